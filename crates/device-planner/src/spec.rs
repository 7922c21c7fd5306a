// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device spec parsing.
//!
//! | Syntax | Meaning |
//! |---|---|
//! | empty | CPU slot |
//! | `"*"` | as many slots as fit |
//! | `"{k}"` | exactly `k` slots |
//! | `"a;b;c"` | exactly these device ids |
//! | trailing `"-"` | force exclusive |
//!
//! A bare `"-1"` id list is the CPU spelling used by front ends.

use crate::PlanError;

/// The shape a device spec requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecForm {
    /// CPU slot (empty spec or the `-1` spelling).
    Cpu,
    /// As many slots as fit.
    All,
    /// Exactly this many slots.
    Count(usize),
    /// Exactly these device ids, in order.
    Explicit(Vec<usize>),
}

/// A parsed device spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    /// Requested shape.
    pub form: SpecForm,
    /// A trailing `-` forces exclusive reservations.
    pub forced_exclusive: bool,
}

impl DeviceSpec {
    /// Parses a raw device spec string.
    pub fn parse(raw: &str) -> Result<Self, PlanError> {
        let trimmed = raw.trim();
        let (body, forced_exclusive) = match trimmed.strip_suffix('-') {
            Some(body) => (body.trim(), true),
            None => (trimmed, false),
        };

        let bad = |detail: &str| PlanError::BadSpec {
            spec: raw.to_string(),
            detail: detail.to_string(),
        };

        if body.is_empty() {
            return Ok(Self {
                form: SpecForm::Cpu,
                forced_exclusive,
            });
        }
        if body == "*" {
            return Ok(Self {
                form: SpecForm::All,
                forced_exclusive,
            });
        }
        if let Some(count) = body.strip_prefix('{').and_then(|b| b.strip_suffix('}')) {
            let count: usize = count
                .trim()
                .parse()
                .map_err(|_| bad("slot count is not an integer"))?;
            if count == 0 {
                return Err(bad("slot count must be >= 1"));
            }
            return Ok(Self {
                form: SpecForm::Count(count),
                forced_exclusive,
            });
        }

        // Remaining form: a ';'-separated id list.
        let mut ids = Vec::new();
        for field in body.split(';') {
            let field = field.trim();
            let id: i64 = field
                .parse()
                .map_err(|_| bad("device id is not an integer"))?;
            ids.push(id);
        }
        if ids.iter().all(|&id| id == -1) {
            return Ok(Self {
                form: SpecForm::Cpu,
                forced_exclusive,
            });
        }
        if ids.iter().any(|&id| id < 0) {
            return Err(bad("negative device id in list"));
        }
        Ok(Self {
            form: SpecForm::Explicit(ids.into_iter().map(|id| id as usize).collect()),
            forced_exclusive,
        })
    }

    /// Returns `true` for the CPU form.
    pub fn is_cpu(&self) -> bool {
        self.form == SpecForm::Cpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> DeviceSpec {
        DeviceSpec::parse(s).unwrap()
    }

    #[test]
    fn test_empty_is_cpu() {
        assert_eq!(parse("").form, SpecForm::Cpu);
        assert_eq!(parse("  ").form, SpecForm::Cpu);
    }

    #[test]
    fn test_minus_one_is_cpu() {
        assert_eq!(parse("-1").form, SpecForm::Cpu);
        assert!(!parse("-1").forced_exclusive);
    }

    #[test]
    fn test_star() {
        let s = parse("*");
        assert_eq!(s.form, SpecForm::All);
        assert!(!s.forced_exclusive);
    }

    #[test]
    fn test_star_exclusive() {
        let s = parse("*-");
        assert_eq!(s.form, SpecForm::All);
        assert!(s.forced_exclusive);
    }

    #[test]
    fn test_count() {
        assert_eq!(parse("{2}").form, SpecForm::Count(2));
        assert_eq!(parse("{16}").form, SpecForm::Count(16));
    }

    #[test]
    fn test_count_exclusive() {
        let s = parse("{4}-");
        assert_eq!(s.form, SpecForm::Count(4));
        assert!(s.forced_exclusive);
    }

    #[test]
    fn test_explicit_list() {
        assert_eq!(parse("0;1;2").form, SpecForm::Explicit(vec![0, 1, 2]));
        assert_eq!(parse("3").form, SpecForm::Explicit(vec![3]));
    }

    #[test]
    fn test_explicit_exclusive() {
        let s = parse("0;1-");
        assert_eq!(s.form, SpecForm::Explicit(vec![0, 1]));
        assert!(s.forced_exclusive);
    }

    #[test]
    fn test_bad_specs() {
        assert!(DeviceSpec::parse("{0}").is_err());
        assert!(DeviceSpec::parse("{x}").is_err());
        assert!(DeviceSpec::parse("0;x").is_err());
        assert!(DeviceSpec::parse("0;-2").is_err());
    }
}
