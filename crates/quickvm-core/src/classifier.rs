//! Classification of raw hypervisor state codes.
//!
//! This is the only place in the workspace that interprets `EnabledState`
//! codes. Everything downstream works on [`ClassifiedState`] plus a
//! critical flag.

use std::collections::HashMap;

use quickvm_common::config::ClassifierConfig;
use quickvm_common::types::{ClassifiedState, RawState};

/// First code of the documented critical block.
pub const CRITICAL_RANGE_START: u16 = 32_781;
/// Last code of the documented critical block.
pub const CRITICAL_RANGE_END: u16 = 32_792;

/// Maps raw state codes to classified states.
///
/// The documented table covers both provider versions. Extra critical codes
/// supplied through configuration are consulted first, so newer providers
/// can be accommodated without a rebuild.
#[derive(Debug, Clone, Default)]
pub struct StateClassifier {
    extra_critical: HashMap<u16, ClassifiedState>,
}

impl StateClassifier {
    /// Creates a classifier with only the documented table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a classifier extended by the given configuration.
    #[must_use]
    pub fn from_config(config: &ClassifierConfig) -> Self {
        let mut classifier = Self::new();
        for entry in &config.extra_critical {
            classifier.add_critical(entry.code, entry.base);
        }
        classifier
    }

    /// Registers `code` as a critical variant of `base`.
    pub fn add_critical(&mut self, code: u16, base: ClassifiedState) {
        tracing::debug!(code, base = %base, "registering extra critical code");
        let _ = self.extra_critical.insert(code, base);
    }

    /// Classifies a raw code. Never fails: unmapped codes are `Unknown`.
    #[must_use]
    pub fn classify(&self, raw: RawState) -> (ClassifiedState, bool) {
        if let Some(&base) = self.extra_critical.get(&raw.code()) {
            return (base, true);
        }
        documented(raw.code()).unwrap_or((ClassifiedState::Unknown, false))
    }

    /// Classifies a raw code and returns only the category.
    #[must_use]
    pub fn category(&self, raw: RawState) -> ClassifiedState {
        self.classify(raw).0
    }

    /// Whether a raw code denotes a critical state.
    #[must_use]
    pub fn is_critical(&self, raw: RawState) -> bool {
        self.classify(raw).1
    }
}

/// Classifies a raw code with the documented table only.
#[must_use]
pub fn classify(raw: RawState) -> (ClassifiedState, bool) {
    documented(raw.code()).unwrap_or((ClassifiedState::Unknown, false))
}

fn documented(code: u16) -> Option<(ClassifiedState, bool)> {
    use ClassifiedState::{
        Off, Paused, Pausing, Resetting, Resuming, Running, Saved, Saving, Starting, Stopping,
    };

    let classified = match code {
        2 => (Running, false),
        3 => (Off, false),
        4 | 32_774 => (Stopping, false),
        6 | 32_769 | 32_779 => (Saved, false),
        9 | 32_768 => (Paused, false),
        10 | 32_770 => (Starting, false),
        11 => (Resetting, false),
        32_773 | 32_780 => (Saving, false),
        32_776 => (Pausing, false),
        32_777 => (Resuming, false),

        32_781 => (Running, true),
        32_782 => (Off, true),
        32_783 => (Stopping, true),
        32_784 | 32_791 => (Saved, true),
        32_785 => (Paused, true),
        32_786 => (Starting, true),
        32_787 => (Resetting, true),
        32_788 | 32_792 => (Saving, true),
        32_789 => (Pausing, true),
        32_790 => (Resuming, true),
        _ => return None,
    };
    Some(classified)
}
