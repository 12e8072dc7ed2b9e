//! Translation of hypervisor return codes into typed outcomes.

use quickvm_common::types::{CommandOutcome, FailureReason};

/// Return code for a transition that completed synchronously.
pub const COMPLETED: u32 = 0;
/// Return code for an accepted transition that runs asynchronously.
pub const TRANSITION_STARTED: u32 = 4096;

/// Maps a raw method return value to a [`CommandOutcome`].
///
/// Codes outside the documented table become `Failed(Unknown)`.
#[must_use]
pub const fn from_return_code(code: u32) -> CommandOutcome {
    let reason = match code {
        COMPLETED => return CommandOutcome::Success,
        TRANSITION_STARTED => return CommandOutcome::TransitionStarted,
        32_768 => FailureReason::Generic,
        32_769 => FailureReason::AccessDenied,
        32_770 => FailureReason::NotSupported,
        32_771 => FailureReason::StatusUnknown,
        32_772 => FailureReason::Timeout,
        32_773 => FailureReason::InvalidParameter,
        32_774 => FailureReason::SystemInUse,
        32_775 => FailureReason::InvalidStateForOperation,
        32_776 => FailureReason::IncorrectDataType,
        32_777 => FailureReason::SystemNotAvailable,
        32_778 => FailureReason::OutOfMemory,
        _ => FailureReason::Unknown,
    };
    CommandOutcome::Failed(reason)
}

/// The documented return code for a failure reason, if it has one.
#[must_use]
pub const fn return_code(reason: FailureReason) -> Option<u32> {
    let code = match reason {
        FailureReason::Generic => 32_768,
        FailureReason::AccessDenied => 32_769,
        FailureReason::NotSupported => 32_770,
        FailureReason::StatusUnknown => 32_771,
        FailureReason::Timeout => 32_772,
        FailureReason::InvalidParameter => 32_773,
        FailureReason::SystemInUse => 32_774,
        FailureReason::InvalidStateForOperation => 32_775,
        FailureReason::IncorrectDataType => 32_776,
        FailureReason::SystemNotAvailable => 32_777,
        FailureReason::OutOfMemory => 32_778,
        FailureReason::Unknown => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: [(u32, CommandOutcome); 13] = [
        (0, CommandOutcome::Success),
        (4096, CommandOutcome::TransitionStarted),
        (32_768, CommandOutcome::Failed(FailureReason::Generic)),
        (32_769, CommandOutcome::Failed(FailureReason::AccessDenied)),
        (32_770, CommandOutcome::Failed(FailureReason::NotSupported)),
        (32_771, CommandOutcome::Failed(FailureReason::StatusUnknown)),
        (32_772, CommandOutcome::Failed(FailureReason::Timeout)),
        (32_773, CommandOutcome::Failed(FailureReason::InvalidParameter)),
        (32_774, CommandOutcome::Failed(FailureReason::SystemInUse)),
        (32_775, CommandOutcome::Failed(FailureReason::InvalidStateForOperation)),
        (32_776, CommandOutcome::Failed(FailureReason::IncorrectDataType)),
        (32_777, CommandOutcome::Failed(FailureReason::SystemNotAvailable)),
        (32_778, CommandOutcome::Failed(FailureReason::OutOfMemory)),
    ];

    #[test]
    fn documented_codes_map_to_listed_outcomes() {
        for (code, expected) in TABLE {
            assert_eq!(from_return_code(code), expected, "code {code}");
        }
    }

    #[test]
    fn documented_codes_map_to_distinct_outcomes() {
        for (i, (_, a)) in TABLE.iter().enumerate() {
            for (_, b) in &TABLE[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn other_codes_are_unknown_failures() {
        for code in [1, 4095, 4097, 32_767, 32_779, 74_095, u32::MAX] {
            assert_eq!(
                from_return_code(code),
                CommandOutcome::Failed(FailureReason::Unknown)
            );
        }
    }

    #[test]
    fn reasons_map_back_to_their_codes() {
        for (code, outcome) in TABLE {
            if let CommandOutcome::Failed(reason) = outcome {
                assert_eq!(return_code(reason), Some(code));
            }
        }
        assert_eq!(return_code(FailureReason::Unknown), None);
    }
}
