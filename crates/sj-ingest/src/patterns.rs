//! Compiled filename patterns

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use sj_common::types::FileRole;
use sj_common::Result;

use crate::config::PatternConfig;

/// Pattern identifying one file role within a set
#[derive(Debug, Clone)]
pub struct RolePattern {
    pub role: FileRole,
    pub regex: Regex,
    pub required: bool,
    /// Table description root for this role's columns
    pub root: String,
}

/// Extracts the export window encoded in a filename
#[derive(Debug, Clone)]
pub struct DateInName {
    regex: Regex,
    format: String,
}

impl DateInName {
    pub fn new(pattern: &str, format: impl Into<String>) -> Result<Self> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            format: format.into(),
        })
    }

    /// Start (group 1) and end (group 2) dates; anything unparsable is `None`
    pub fn parse(&self, name: &str) -> (Option<NaiveDate>, Option<NaiveDate>) {
        let Some(caps) = self.regex.captures(name) else {
            return (None, None);
        };
        let date = |idx: usize| caps.get(idx).and_then(|m| parse_date(m.as_str(), &self.format));
        (date(1), date(2))
    }
}

fn parse_date(value: &str, format: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, format)
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(value, format).ok().map(|dt| dt.date()))
}

/// All filename patterns of one configuration, compiled once per pass
#[derive(Debug, Clone)]
pub struct PatternCatalog {
    set: Regex,
    link: Regex,
    date_in_name: Option<DateInName>,
    roles: Vec<RolePattern>,
}

impl PatternCatalog {
    pub fn from_config(config: &PatternConfig) -> Result<Self> {
        let roles = config
            .roles
            .iter()
            .map(|(role, role_config)| {
                Ok(RolePattern {
                    role: *role,
                    regex: Regex::new(&role_config.pattern)?,
                    required: role_config.required,
                    root: role_config.root.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let date_in_name = config
            .date_in_name_pattern
            .as_deref()
            .map(|pattern| DateInName::new(pattern, config.date_in_name_format.clone()))
            .transpose()?;

        Ok(Self {
            set: Regex::new(&config.set_pattern)?,
            link: Regex::new(&config.set_link_pattern)?,
            date_in_name,
            roles,
        })
    }

    /// Whether the file takes part in any export set
    pub fn belongs_to_set(&self, name: &str) -> bool {
        self.set.is_match(name)
    }

    /// Set id shared by all files of one export: capture group 1 when the
    /// link pattern has one, otherwise the whole match.
    pub fn link_id(&self, name: &str) -> Option<String> {
        let caps = self.link.captures(name)?;
        caps.get(1)
            .or_else(|| caps.get(0))
            .map(|m| m.as_str().to_string())
            .filter(|id| !id.is_empty())
    }

    /// Role patterns in role order (primary first)
    pub fn roles(&self) -> &[RolePattern] {
        &self.roles
    }

    pub fn role(&self, role: FileRole) -> Option<&RolePattern> {
        self.roles.iter().find(|r| r.role == role)
    }

    pub fn date_in_name(&self) -> Option<&DateInName> {
        self.date_in_name.as_ref()
    }
}
