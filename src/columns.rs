//! # Column Aliases
//!
//! Maps the header text a spreadsheet export happens to use (e.g.
//! "Capital Dispersado Actual", "% FPD Actual") onto the semantic column
//! names the engine binds to (`capital`, `first_payment_default_rate`, ...).
//!
//! - Loads from TOML (`[aliases]` table: header → canonical name).
//! - Case-, accent- and punctuation-insensitive lookup.
//! - Canonical names always resolve to themselves.
//! - Includes a built-in `default_seed()` with the branch dashboard headers.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};
use tracing::warn;

use crate::features::{IDENTITY_COLUMNS, REQUIRED_COLUMNS};

/// Header alias table, keyed by normalized header text.
#[derive(Debug, Clone, Default)]
pub struct ColumnAliases {
    aliases: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct AliasFile {
    #[serde(default)]
    aliases: HashMap<String, String>,
    /// Keep the built-in spreadsheet headers underneath the file's entries.
    #[serde(default = "default_true")]
    extend_seed: bool,
}

fn default_true() -> bool {
    true
}

impl ColumnAliases {
    /// Parse the TOML alias file. Targets must be known canonical names.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: AliasFile = toml::from_str(s).context("parsing column alias TOML")?;
        let mut out = if file.extend_seed {
            Self::default_seed()
        } else {
            Self::default()
        };
        for (header, canon) in file.aliases {
            let canon = canon.trim();
            if !is_canonical(canon) {
                anyhow::bail!("alias `{header}` targets unknown column `{canon}`");
            }
            out.insert(&header, canon);
        }
        Ok(out)
    }

    /// Load aliases from a TOML file.
    /// Falls back to `default_seed()` (with a warning) when the file is unusable.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let parsed = fs::read_to_string(path)
            .with_context(|| format!("reading column aliases from {}", path.display()))
            .and_then(|s| Self::from_toml_str(&s));
        match parsed {
            Ok(aliases) => aliases,
            Err(e) => {
                warn!(error = %e, "column aliases unavailable, using built-in headers");
                Self::default_seed()
            }
        }
    }

    /// Register one header alias.
    pub fn insert(&mut self, header: &str, canonical: &str) {
        self.aliases
            .insert(normalize(header), canonical.to_string());
    }

    /// Canonical column name for a header, if it is one we know.
    ///
    /// Steps:
    /// 1. Alias lookup on the normalized header.
    /// 2. The header already is a canonical name (in any casing/spacing).
    pub fn resolve(&self, header: &str) -> Option<&str> {
        let key = normalize(header);
        if let Some(canon) = self.aliases.get(&key) {
            return Some(canon.as_str());
        }
        REQUIRED_COLUMNS
            .iter()
            .chain(IDENTITY_COLUMNS.iter())
            .find(|c| normalize(c) == key)
            .copied()
    }

    /// Headers of the branch dashboard's spreadsheet export.
    pub fn default_seed() -> Self {
        let mut out = Self::default();
        for (header, canon) in [
            ("Capital Dispersado Actual", "capital"),
            ("Capital Dispersado", "capital"),
            ("Morosidad Temprana Actual", "early_delinquency_rate"),
            ("Morosidad Temprana", "early_delinquency_rate"),
            ("% FPD Actual", "first_payment_default_rate"),
            ("FPD Actual", "first_payment_default_rate"),
            ("FPD", "first_payment_default_rate"),
            ("ICV", "credit_risk_index"),
            ("ICV Actual", "credit_risk_index"),
            ("Saldo Insoluto Vencido Actual", "past_due_balance"),
            ("Saldo Vencido", "past_due_balance"),
            ("Ratio_Cartera_Vencida Actual", "past_due_ratio"),
            ("Ratio Cartera Vencida", "past_due_ratio"),
            ("Crecimiento Saldo Actual", "balance_growth_rate"),
            ("Crecimiento Saldo", "balance_growth_rate"),
            ("Sucursal", "branch"),
            ("Región", "region"),
            ("Zona", "zone"),
        ] {
            out.insert(header, canon);
        }
        out
    }
}

fn is_canonical(name: &str) -> bool {
    REQUIRED_COLUMNS.contains(&name) || IDENTITY_COLUMNS.contains(&name)
}

/// Normalize a header: lowercase, fold Spanish accents, turn punctuation and
/// separators into spaces, collapse runs of spaces.
fn normalize(s: &str) -> String {
    let folded: String = s
        .trim()
        .chars()
        .map(|ch| match ch {
            'á' | 'Á' => 'a',
            'é' | 'É' => 'e',
            'í' | 'Í' => 'i',
            'ó' | 'Ó' => 'o',
            'ú' | 'Ú' | 'ü' | 'Ü' => 'u',
            'ñ' | 'Ñ' => 'n',
            '—' | '–' | '-' | '_' | '/' | '\\' | '%' | '.' | ',' | '\'' => ' ',
            c => c.to_ascii_lowercase(),
        })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_headers_resolve() {
        let a = ColumnAliases::default_seed();
        assert_eq!(a.resolve("Capital Dispersado Actual"), Some("capital"));
        assert_eq!(a.resolve("% FPD Actual"), Some("first_payment_default_rate"));
        assert_eq!(a.resolve("Ratio_Cartera_Vencida Actual"), Some("past_due_ratio"));
        assert_eq!(a.resolve("Sucursal"), Some("branch"));
    }

    #[test]
    fn accents_and_case_are_ignored() {
        let a = ColumnAliases::default_seed();
        assert_eq!(a.resolve("REGION"), Some("region"));
        assert_eq!(a.resolve("región"), Some("region"));
        assert_eq!(a.resolve("  zona "), Some("zone"));
    }

    #[test]
    fn canonical_names_resolve_to_themselves() {
        let a = ColumnAliases::default();
        assert_eq!(a.resolve("past_due_balance"), Some("past_due_balance"));
        assert_eq!(a.resolve("Past Due Balance"), Some("past_due_balance"));
        assert_eq!(a.resolve("branch"), Some("branch"));
    }

    #[test]
    fn unknown_header_is_none() {
        let a = ColumnAliases::default_seed();
        assert_eq!(a.resolve("Gerente"), None);
    }

    #[test]
    fn toml_extends_seed() {
        let a = ColumnAliases::from_toml_str(
            r#"
            [aliases]
            "Cap. Total" = "capital"
            "#,
        )
        .unwrap();
        assert_eq!(a.resolve("cap total"), Some("capital"));
        assert_eq!(a.resolve("Zona"), Some("zone"));
    }

    #[test]
    fn toml_without_seed() {
        let a = ColumnAliases::from_toml_str(
            r#"
            extend_seed = false
            [aliases]
            "Cap" = "capital"
            "#,
        )
        .unwrap();
        assert_eq!(a.resolve("Zona"), None);
        assert_eq!(a.resolve("cap"), Some("capital"));
    }

    #[test]
    fn toml_rejects_unknown_target() {
        let err = ColumnAliases::from_toml_str(
            r#"
            [aliases]
            "Cap" = "capitol"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("capitol"));
    }
}
