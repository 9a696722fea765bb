//! Transaction classification
//!
//! This module handles:
//! - Direction relative to the queried address
//! - EVM method selector / function name to action mapping
//! - Confirmation count to status mapping
//! - BioForest type-code lookup

use crate::model::{Action, Direction, TxStatus};

/// `transfer(address,uint256)`
pub const SELECTOR_TRANSFER: &str = "0xa9059cbb";
/// `transferFrom(address,address,uint256)`
pub const SELECTOR_TRANSFER_FROM: &str = "0x23b872dd";
/// `approve(address,uint256)`
pub const SELECTOR_APPROVE: &str = "0x095ea7b3";

/// Known selectors and the action they imply
const SELECTOR_ACTIONS: &[(&str, Action)] = &[
    (SELECTOR_TRANSFER, Action::Transfer),
    (SELECTOR_TRANSFER_FROM, Action::Transfer),
    (SELECTOR_APPROVE, Action::Approve),
    // safeTransferFrom(address,address,uint256) / (…,bytes)
    ("0x42842e0e", Action::Transfer),
    ("0xb88d4fde", Action::Transfer),
    // uniswap v2 router
    ("0x38ed1739", Action::Swap),
    ("0x7ff36ab5", Action::Swap),
    ("0x18cbafe5", Action::Swap),
    ("0x8803dbee", Action::Swap),
    ("0xfb3bdb41", Action::Swap),
    // universal router execute
    ("0x3593564c", Action::Swap),
    // WETH deposit / withdraw
    ("0xd0e30db0", Action::Stake),
    ("0x2e1a7d4d", Action::Withdraw),
    ("0x4e71d92d", Action::Claim),
    ("0x40c10f19", Action::Mint),
    ("0x42966c68", Action::Burn),
];

/// Direction rule: both ends match => self, sender matches => out, else in.
pub fn direction(from: &str, to: &str, address: &str) -> Direction {
    let from_matches = from.eq_ignore_ascii_case(address);
    let to_matches = to.eq_ignore_ascii_case(address);
    match (from_matches, to_matches) {
        (true, true) => Direction::SelfTransfer,
        (true, false) => Direction::Out,
        _ => Direction::In,
    }
}

/// Normalize a selector to lowercase `0x` + 8 hex chars
pub fn normalize_selector(selector: &str) -> Option<String> {
    let digits = selector.trim().trim_start_matches("0x").to_lowercase();
    if digits.len() < 8 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", &digits[..8]))
}

/// Selector from call data, if the data carries one
pub fn selector_from_input(input: &str) -> Option<String> {
    let digits = input.trim().trim_start_matches("0x");
    normalize_selector(digits.get(..8)?)
}

/// Recognize a contract method, by selector first, then by function name.
/// Returns `None` when nothing is recognized.
pub fn action_for_method(method_id: Option<&str>, function_name: Option<&str>) -> Option<Action> {
    if let Some(selector) = method_id.and_then(normalize_selector) {
        if let Some((_, action)) = SELECTOR_ACTIONS.iter().find(|(s, _)| *s == selector) {
            return Some(*action);
        }
    }
    let name = function_name?.trim();
    if name.is_empty() {
        return None;
    }
    let name = name.split('(').next().unwrap_or(name).to_lowercase();
    let action = if name == "approve" || name == "setapprovalforall" {
        Action::Approve
    } else if name.starts_with("transfer") || name.starts_with("safetransfer") {
        Action::Transfer
    } else if name.contains("swap") || name == "execute" || name == "multicall" {
        Action::Swap
    } else if name.starts_with("unstake") || name.starts_with("withdraw") {
        Action::Unstake
    } else if name.starts_with("stake") || name.starts_with("deposit") {
        Action::Stake
    } else if name.starts_with("claim") {
        Action::Claim
    } else if name.starts_with("mint") {
        Action::Mint
    } else if name.starts_with("burn") {
        Action::Burn
    } else {
        return None;
    };
    Some(action)
}

/// Status from confirmation count and the chain's finality threshold
pub fn status_from_confirmations(confirmations: u64, required: u32) -> TxStatus {
    if confirmations == 0 {
        TxStatus::Pending
    } else if confirmations < u64::from(required.max(1)) {
        TxStatus::Confirming
    } else {
        TxStatus::Confirmed
    }
}

/// BioForest `{TYPECODE}-{VERSION}` to action
const BIOFOREST_ACTIONS: &[(&str, Action)] = &[
    ("BSE-01", Action::Signature),
    ("BSE-02", Action::Signature),
    ("BSE-03", Action::Contract),
    ("BSE-04", Action::Vote),
    ("AST-00", Action::IssueAsset),
    ("AST-01", Action::IssueAsset),
    ("AST-02", Action::Transfer),
    ("AST-03", Action::DestroyAsset),
    ("AST-04", Action::Transfer),
    ("AST-05", Action::Claim),
    ("AST-06", Action::Swap),
    ("ETY-01", Action::IssueEntity),
    ("ETY-02", Action::IssueEntity),
    ("ETY-03", Action::DestroyEntity),
    ("ETY-04", Action::Transfer),
    ("ETY-05", Action::Transfer),
    ("CRT-01", Action::Certificate),
    ("CRT-02", Action::Certificate),
    ("LNS-00", Action::CreateAccount),
    ("DAP-00", Action::IssueAsset),
    ("DAP-01", Action::Transfer),
    ("MAC-00", Action::Contract),
    ("WOD-00", Action::Vote),
];

/// Classify a BioForest type code (`{CHAIN}-{NETWORK}-{TYPECODE}-{VERSION}`).
pub fn bioforest_action(type_code: &str) -> Action {
    let parts: Vec<&str> = type_code.trim().split('-').collect();
    if parts.len() < 2 {
        return Action::Unknown;
    }
    let key = format!(
        "{}-{}",
        parts[parts.len() - 2].to_uppercase(),
        parts[parts.len() - 1]
    );
    BIOFOREST_ACTIONS
        .iter()
        .find(|(code, _)| *code == key)
        .map(|(_, action)| *action)
        .unwrap_or(Action::Unknown)
}

/// Actions whose BioForest payload carries no quantifiable amount
pub fn is_unquantified_action(action: Action) -> bool {
    matches!(
        action,
        Action::IssueEntity
            | Action::DestroyEntity
            | Action::Signature
            | Action::Certificate
            | Action::CreateAccount
            | Action::Vote
            | Action::Contract
            | Action::Unknown
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_rule() {
        let me = "0xAbC0000000000000000000000000000000000001";
        let other = "0x0000000000000000000000000000000000000002";
        assert_eq!(direction(&me.to_lowercase(), me, me), Direction::SelfTransfer);
        assert_eq!(direction(me, other, &me.to_lowercase()), Direction::Out);
        assert_eq!(direction(other, me, me), Direction::In);
        assert_eq!(direction(other, other, me), Direction::In);
    }

    #[test]
    fn test_selector_lookup() {
        assert_eq!(action_for_method(Some("0xa9059cbb"), None), Some(Action::Transfer));
        assert_eq!(action_for_method(Some("0x095EA7B3"), None), Some(Action::Approve));
        assert_eq!(action_for_method(Some("0xdeadbeef"), None), None);
        assert_eq!(
            action_for_method(Some("0xdeadbeef"), Some("swapExactTokensForETH(uint256,uint256)")),
            Some(Action::Swap)
        );
        assert_eq!(action_for_method(None, Some("")), None);
    }

    #[test]
    fn test_selector_from_input() {
        assert_eq!(selector_from_input("0xa9059cbb000000"), Some("0xa9059cbb".to_string()));
        assert_eq!(selector_from_input("0x"), None);
        assert_eq!(selector_from_input("0xa9059c"), None);
        assert_eq!(selector_from_input("0x€€€"), None);
        assert_eq!(selector_from_input("0xa9€€€€€€€"), None);
        assert_eq!(selector_from_input("0xzzzzzzzz00"), None);
    }

    #[test]
    fn test_status_from_confirmations() {
        assert_eq!(status_from_confirmations(0, 6), TxStatus::Pending);
        assert_eq!(status_from_confirmations(3, 6), TxStatus::Confirming);
        assert_eq!(status_from_confirmations(6, 6), TxStatus::Confirmed);
        assert_eq!(status_from_confirmations(1, 0), TxStatus::Confirmed);
    }

    #[test]
    fn test_bioforest_codes() {
        assert_eq!(bioforest_action("BFM-BFMETA-AST-02"), Action::Transfer);
        assert_eq!(bioforest_action("BFM-BFMETA-AST-03"), Action::DestroyAsset);
        assert_eq!(bioforest_action("CCC-CCCHAIN-ETY-02"), Action::IssueEntity);
        assert_eq!(bioforest_action("BFM-BFMETA-ZZZ-99"), Action::Unknown);
        assert_eq!(bioforest_action("garbage"), Action::Unknown);
    }
}
