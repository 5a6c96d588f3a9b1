//! Version token extraction and ordering.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Substring a directory name must contain to be considered an installation.
pub const PRODUCT_NAME: &str = "EnergyPlus";

/// Length, in characters, of the `EnergyPlus-` prefix stripped off to obtain the
/// version token.
pub const PRODUCT_PREFIX_LEN: usize = 11;

/// How version tokens are compared when picking the newest installation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum VersionOrdering {
    /// Plain string comparison. `9-6-0` sorts after `10-0-0`.
    #[default]
    Lexical,
    /// Compare `-`/`.` separated segments numerically where both sides parse.
    Numeric,
}

impl VersionOrdering {
    pub fn compare(self, a: &str, b: &str) -> Ordering {
        match self {
            VersionOrdering::Lexical => a.cmp(b),
            VersionOrdering::Numeric => compare_numeric(a, b),
        }
    }
}

/// Version token for an installation directory name, or `None` when the name
/// does not look like an installation at all.
///
/// Names that contain the product name but are too short to hold a version
/// yield an empty token, which sorts before every real version.
pub fn version_token(dir_name: &str) -> Option<String> {
    if !dir_name.contains(PRODUCT_NAME) {
        return None;
    }
    let token = match dir_name.char_indices().nth(PRODUCT_PREFIX_LEN) {
        Some((at, _)) => &dir_name[at..],
        None => "",
    };
    Some(token.to_string())
}

/// Version number from an executable's `--version` banner, e.g.
/// `EnergyPlus, Version 9.6.0-f420c06a69` yields `9.6.0`.
pub fn parse_version_banner(banner: &str) -> Option<String> {
    let (_, rest) = banner.split_once("Version")?;
    let number: String = rest
        .trim_start_matches([' ', ':'])
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let number = number.trim_end_matches('.');
    (!number.is_empty()).then(|| number.to_string())
}

fn compare_numeric(a: &str, b: &str) -> Ordering {
    let split = |s: &str| -> Vec<String> {
        s.split(['-', '.'])
            .filter(|seg| !seg.is_empty())
            .map(str::to_string)
            .collect()
    };
    let (left, right) = (split(a), split(b));
    for (l, r) in left.iter().zip(right.iter()) {
        let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            // A numeric segment outranks a non-numeric one.
            (Ok(_), Err(_)) => Ordering::Greater,
            (Err(_), Ok(_)) => Ordering::Less,
            (Err(_), Err(_)) => l.cmp(r),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len())
}
