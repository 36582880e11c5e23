//! Per-mirror policy rules
//!
//! A rule is a predicate over a single dot-notation field of the per-request
//! fact set (client IP, ASN, geo lookup). All matchers on a rule must hold,
//! and all rules on a mirror must hold, for the mirror to stay eligible.
//!
//! Field access goes through an explicit dispatch table instead of
//! reflection: the fact set is a closed struct, and every addressable field
//! is listed in [`Facts::get`] with its accepted spellings.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::geo::{Asn, City};

// ============================================================================
// Rule
// ============================================================================

/// A single matching rule on a mirror.
///
/// The four matchers are mutually optional; whichever are present must all
/// hold. This can be used to exclude ASNs, countries, and more from a mirror.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rule {
    /// Dot-notation field into the fact set,
    /// e.g. `asn.autonomous_system_number` or `location.country.iso_code`
    pub field: String,

    /// Equality matcher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is: Option<String>,

    /// Inequality matcher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_not: Option<String>,

    /// Membership matcher
    #[serde(rename = "in", default, skip_serializing_if = "Vec::is_empty")]
    pub r#in: Vec<String>,

    /// Non-membership matcher
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_in: Vec<String>,
}

impl Rule {
    /// Check the matchers against a resolved field value
    fn matches(&self, value: &str) -> bool {
        if let Some(is) = &self.is {
            if value != is {
                return false;
            }
        }

        if let Some(is_not) = &self.is_not {
            if value == is_not {
                return false;
            }
        }

        if !self.r#in.is_empty() && !self.r#in.iter().any(|v| v == value) {
            return false;
        }

        if !self.not_in.is_empty() && self.not_in.iter().any(|v| v == value) {
            return false;
        }

        true
    }
}

// ============================================================================
// Facts
// ============================================================================

/// The per-request attributes rules are evaluated against
#[derive(Debug, Clone)]
pub struct Facts {
    /// Client address
    pub ip: IpAddr,

    /// ASN record, absent when no ASN database is configured
    pub asn: Option<Asn>,

    /// City lookup for the client address
    pub location: City,
}

impl Facts {
    /// Resolve a dot-notation field to its textual value.
    ///
    /// Each field answers to its canonical name and to the serialization
    /// aliases recognized for it. Returns `None` when the field does not
    /// exist or its branch of the fact set is absent (no ASN database).
    pub fn get(&self, field: &str) -> Option<String> {
        match field {
            "ip" => Some(self.ip.to_string()),

            "asn.autonomous_system_number" | "asn.number" => self
                .asn
                .as_ref()
                .map(|asn| asn.autonomous_system_number.to_string()),
            "asn.autonomous_system_organization" | "asn.organization" => self
                .asn
                .as_ref()
                .map(|asn| asn.autonomous_system_organization.clone()),

            "location.continent.code" | "city.continent.code" => {
                Some(self.location.continent.code.clone())
            }
            "location.country.iso_code" | "city.country.iso_code" => {
                Some(self.location.country.iso_code.clone())
            }
            "location.registered_country.iso_code" | "city.registered_country.iso_code" => {
                Some(self.location.registered_country.iso_code.clone())
            }
            "location.location.latitude" | "city.location.latitude" => {
                Some(self.location.location.latitude.to_string())
            }
            "location.location.longitude" | "city.location.longitude" => {
                Some(self.location.location.longitude.to_string())
            }

            _ => None,
        }
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Evaluate all rules against the fact set.
///
/// A rule whose field cannot be resolved is skipped with a warning; a rule
/// whose matchers fail short-circuits to `false`.
pub fn evaluate(rules: &[Rule], facts: &Facts) -> bool {
    for rule in rules {
        let value = match facts.get(&rule.field) {
            Some(value) => value,
            None => {
                tracing::warn!(field = %rule.field, "Unknown or absent rule field, skipping rule");
                continue;
            }
        };

        if !rule.matches(&value) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Continent, Country, Location};

    fn facts() -> Facts {
        Facts {
            ip: "93.184.216.34".parse().unwrap(),
            asn: Some(Asn {
                autonomous_system_number: 15133,
                autonomous_system_organization: "EDGECAST".to_string(),
            }),
            location: City {
                continent: Continent {
                    code: "EU".to_string(),
                },
                country: Country {
                    iso_code: "DE".to_string(),
                },
                location: Location {
                    latitude: 50.1109,
                    longitude: 8.6821,
                },
                registered_country: Country {
                    iso_code: "DE".to_string(),
                },
            },
        }
    }

    fn rule(field: &str) -> Rule {
        Rule {
            field: field.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_rules_accept() {
        assert!(evaluate(&[], &facts()));
    }

    #[test]
    fn test_is_matcher() {
        let mut r = rule("location.country.iso_code");
        r.is = Some("DE".to_string());
        assert!(evaluate(&[r.clone()], &facts()));

        r.is = Some("FR".to_string());
        assert!(!evaluate(&[r], &facts()));
    }

    #[test]
    fn test_is_not_matcher() {
        let mut r = rule("location.continent.code");
        r.is_not = Some("NA".to_string());
        assert!(evaluate(&[r.clone()], &facts()));

        r.is_not = Some("EU".to_string());
        assert!(!evaluate(&[r], &facts()));
    }

    #[test]
    fn test_in_and_not_in_matchers() {
        let mut r = rule("asn.autonomous_system_number");
        r.r#in = vec!["15133".to_string(), "64512".to_string()];
        assert!(evaluate(&[r], &facts()));

        let mut r = rule("asn.autonomous_system_number");
        r.not_in = vec!["15133".to_string()];
        assert!(!evaluate(&[r], &facts()));
    }

    #[test]
    fn test_all_matchers_on_one_rule_must_hold() {
        let mut r = rule("location.country.iso_code");
        r.is = Some("DE".to_string());
        r.not_in = vec!["DE".to_string()];
        assert!(!evaluate(&[r], &facts()));
    }

    #[test]
    fn test_failing_rule_short_circuits() {
        let mut pass = rule("location.country.iso_code");
        pass.is = Some("DE".to_string());

        let mut fail = rule("location.continent.code");
        fail.is = Some("NA".to_string());

        assert!(!evaluate(&[pass, fail], &facts()));
    }

    #[test]
    fn test_absent_asn_skips_rule() {
        let mut f = facts();
        f.asn = None;

        let mut r = rule("asn.autonomous_system_number");
        r.is = Some("15133".to_string());

        // The rule cannot be resolved, so it does not veto the mirror
        assert!(evaluate(&[r], &f));
    }

    #[test]
    fn test_unknown_field_skips_rule() {
        let mut r = rule("no.such.field");
        r.is = Some("anything".to_string());
        assert!(evaluate(&[r], &facts()));
    }

    #[test]
    fn test_alias_resolution() {
        let f = facts();
        assert_eq!(f.get("asn.number").as_deref(), Some("15133"));
        assert_eq!(
            f.get("asn.autonomous_system_number").as_deref(),
            Some("15133")
        );
        assert_eq!(f.get("city.country.iso_code").as_deref(), Some("DE"));
    }

    #[test]
    fn test_rule_yaml_shape() {
        let yaml = r#"
field: asn.autonomous_system_number
not_in: ["64512", "64513"]
"#;
        let r: Rule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(r.field, "asn.autonomous_system_number");
        assert_eq!(r.not_in.len(), 2);
        assert!(r.is.is_none());
    }
}
