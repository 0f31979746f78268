//! Feature flags: the per-operation permission policy.
//!
//! A feature spec such as `"ls,get,put"` is parsed once into a
//! [`FeatureFlags`] bitset. Past the parse boundary only [`Feature`] values
//! exist, so an unknown capability cannot be represented.

use std::fmt;
use std::str::FromStr;

use crate::errors::DriverError;

/// Feature spec used when none is configured.
pub const DEFAULT_FEATURE_SET: &str = "ls";

/// A single toggleable capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Feature {
    ChangeDir = 1 << 0,
    List = 1 << 1,
    RemoveDir = 1 << 2,
    Remove = 1 << 3,
    Move = 1 << 4,
    MakeDir = 1 << 5,
    Get = 1 << 6,
    Put = 1 << 7,
}

impl Feature {
    /// Every capability, in bit order.
    pub const ALL: [Feature; 8] = [
        Feature::ChangeDir,
        Feature::List,
        Feature::RemoveDir,
        Feature::Remove,
        Feature::Move,
        Feature::MakeDir,
        Feature::Get,
        Feature::Put,
    ];

    /// The spec token for this capability (`cd`, `ls`, ...).
    pub fn token(self) -> &'static str {
        match self {
            Feature::ChangeDir => "cd",
            Feature::List => "ls",
            Feature::RemoveDir => "rmdir",
            Feature::Remove => "rm",
            Feature::Move => "mv",
            Feature::MakeDir => "mkdir",
            Feature::Get => "get",
            Feature::Put => "put",
        }
    }

    /// The operation name reported in `OperationNotEnabled` errors.
    pub fn op_name(self) -> &'static str {
        match self {
            Feature::ChangeDir => "CD",
            Feature::List => "LS",
            Feature::RemoveDir => "RMDIR",
            Feature::Remove => "RM",
            Feature::Move => "MV",
            Feature::MakeDir => "MKDIR",
            Feature::Get => "GET",
            Feature::Put => "PUT",
        }
    }

    fn bit(self) -> u8 {
        self as u8
    }
}

impl FromStr for Feature {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Feature::ALL
            .into_iter()
            .find(|f| f.token() == lowered)
            .ok_or_else(|| DriverError::InvalidFeatureSpec {
                reason: format!("unknown feature flag: {s:?}"),
            })
    }
}

/// An immutable set of enabled capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags(u8);

impl FeatureFlags {
    /// The empty set. Only reachable programmatically; `parse` rejects empty specs.
    pub const fn none() -> Self {
        Self(0)
    }

    /// Every capability enabled.
    pub fn all() -> Self {
        Self::from_features(Feature::ALL)
    }

    /// Build a set from an explicit list of capabilities.
    pub fn from_features(features: impl IntoIterator<Item = Feature>) -> Self {
        Self(features.into_iter().fold(0, |acc, f| acc | f.bit()))
    }

    /// Parse a comma-separated, case-insensitive feature spec.
    ///
    /// Fails on a blank spec and on any token outside the vocabulary,
    /// including the empty token produced by a trailing comma.
    pub fn parse(spec: &str) -> Result<Self, DriverError> {
        if spec.trim().is_empty() {
            return Err(DriverError::InvalidFeatureSpec {
                reason: "empty feature set".to_string(),
            });
        }
        let mut bits = 0u8;
        for token in spec.split(',') {
            bits |= token.parse::<Feature>()?.bit();
        }
        Ok(Self(bits))
    }

    /// Membership test.
    pub fn has(self, feature: Feature) -> bool {
        self.0 & feature.bit() != 0
    }

    /// Gate an operation on `feature`.
    pub fn require(self, feature: Feature) -> Result<(), DriverError> {
        if self.has(feature) {
            Ok(())
        } else {
            Err(DriverError::OperationNotEnabled {
                op: feature.op_name(),
            })
        }
    }

    /// Iterate the enabled capabilities in bit order.
    pub fn iter(self) -> impl Iterator<Item = Feature> {
        Feature::ALL.into_iter().filter(move |f| self.has(*f))
    }
}

impl FromStr for FeatureFlags {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FeatureFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<&str> = self.iter().map(Feature::token).collect();
        f.write_str(&tokens.join(","))
    }
}

// -- Tests --------------------------------------------------------------------
