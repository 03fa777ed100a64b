//! Common types used across the sales journal workspace

use serde::{Deserialize, Serialize};

use crate::error::{Result, SjError};

/// Role a file plays within an export batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    /// Main transactional records (the sales journal itself)
    Primary,
    /// Promotions applied to sales journal rows
    Promo,
    /// Flight segments, one row per leg
    Segment,
}

impl FileRole {
    pub const ALL: [FileRole; 3] = [FileRole::Primary, FileRole::Promo, FileRole::Segment];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileRole::Primary => "primary",
            FileRole::Promo => "promo",
            FileRole::Segment => "segment",
        }
    }
}

impl std::fmt::Display for FileRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileRole {
    type Err = SjError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "primary" | "sj" => Ok(FileRole::Primary),
            "promo" => Ok(FileRole::Promo),
            "segment" | "segs" => Ok(FileRole::Segment),
            _ => Err(SjError::config(format!("Unknown file role: {}", s))),
        }
    }
}

/// Widest key domain the seen-key bitset may cover (2^32 keys, 512 MiB)
pub const MAX_KEY_DOMAIN_WIDTH: u64 = 1 << 32;

/// Inclusive range of primary key values that can ever be encountered.
///
/// The domain is configuration, not derived from data: every key read from
/// storage or from an export must fall inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyDomain {
    pub min_sj_pk_value: i64,
    pub max_sj_pk_value: i64,
}

impl KeyDomain {
    /// Create a validated domain
    pub fn new(min_sj_pk_value: i64, max_sj_pk_value: i64) -> Result<Self> {
        let domain = Self {
            min_sj_pk_value,
            max_sj_pk_value,
        };
        domain.validate()?;
        Ok(domain)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_sj_pk_value < self.min_sj_pk_value {
            return Err(SjError::config(format!(
                "sj_pk_range: max_sj_pk_value ({}) is less than min_sj_pk_value ({})",
                self.max_sj_pk_value, self.min_sj_pk_value
            )));
        }
        let width = self.span();
        if width > MAX_KEY_DOMAIN_WIDTH as i128 {
            return Err(SjError::config(format!(
                "sj_pk_range: [{}, {}] spans {} keys, more than the {} that can be tracked",
                self.min_sj_pk_value, self.max_sj_pk_value, width, MAX_KEY_DOMAIN_WIDTH
            )));
        }
        Ok(())
    }

    fn span(&self) -> i128 {
        (self.max_sj_pk_value as i128) - (self.min_sj_pk_value as i128) + 1
    }

    /// Number of distinct keys in the domain
    pub fn width(&self) -> Result<usize> {
        self.validate()?;
        usize::try_from(self.span()).map_err(|_| {
            SjError::config(format!(
                "sj_pk_range: [{}, {}] is too wide to track on this platform",
                self.min_sj_pk_value, self.max_sj_pk_value
            ))
        })
    }

    pub fn contains(&self, key: i64) -> bool {
        key >= self.min_sj_pk_value && key <= self.max_sj_pk_value
    }

    /// Offset of `key` from the start of the domain
    pub fn offset(&self, key: i64) -> Result<usize> {
        if !self.contains(key) {
            return Err(SjError::KeyOutOfRange {
                key,
                min: self.min_sj_pk_value,
                max: self.max_sj_pk_value,
            });
        }
        // in range, so the difference is non-negative and no wider than the domain
        Ok((key as i128 - self.min_sj_pk_value as i128) as usize)
    }
}

impl Default for KeyDomain {
    fn default() -> Self {
        Self {
            min_sj_pk_value: 0,
            max_sj_pk_value: 10_000_000,
        }
    }
}

/// How many passes a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Execute exactly one pass
    #[default]
    Normal,
    /// Repeat passes until the backlog is drained
    Loop,
}

impl std::str::FromStr for RunMode {
    type Err = SjError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normal" | "once" => Ok(RunMode::Normal),
            "loop" => Ok(RunMode::Loop),
            _ => Err(SjError::config(format!(
                "Invalid run mode: {}. Must be 'normal' or 'loop'",
                s
            ))),
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Normal => write!(f, "normal"),
            RunMode::Loop => write!(f, "loop"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_key_domain_rejects_negative_width() {
        assert!(KeyDomain::new(10, 9).is_err());
        assert_eq!(KeyDomain::new(10, 10).unwrap().width().unwrap(), 1);
    }

    #[test]
    fn test_key_domain_width_is_bounded() {
        let err = KeyDomain::new(0, i64::MAX).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("sj_pk_range"));

        let widest = MAX_KEY_DOMAIN_WIDTH as i64;
        assert!(KeyDomain::new(1, widest).is_ok());
        assert!(KeyDomain::new(0, widest).is_err());
        assert!(KeyDomain::new(i64::MIN, i64::MAX).is_err());
    }

    #[test]
    fn test_key_domain_offset() {
        let domain = KeyDomain::new(-5, 5).unwrap();
        assert_eq!(domain.offset(-5).unwrap(), 0);
        assert_eq!(domain.offset(5).unwrap(), 10);
        assert!(matches!(
            domain.offset(6),
            Err(SjError::KeyOutOfRange { key: 6, min: -5, max: 5 })
        ));
    }

    #[test]
    fn test_run_mode_from_str() {
        assert_eq!("LOOP".parse::<RunMode>().unwrap(), RunMode::Loop);
        assert_eq!("normal".parse::<RunMode>().unwrap(), RunMode::Normal);
        assert!("forever".parse::<RunMode>().is_err());
    }

    #[test]
    fn test_file_role_aliases() {
        assert_eq!("sj".parse::<FileRole>().unwrap(), FileRole::Primary);
        assert_eq!("segs".parse::<FileRole>().unwrap(), FileRole::Segment);
        assert_eq!(FileRole::Promo.to_string(), "promo");
    }
}
