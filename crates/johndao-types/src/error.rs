//! Domain errors returned by the canister.

use serde::{Deserialize, Serialize};

/// A tagged business-rule failure returned by the canister.
///
/// These are distinct from transport failures: the call reached the
/// canister and was rejected by a domain rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum CanisterError {
    #[error("already voted")]
    AlreadyVoted,
    #[error("round result does not exist")]
    RoundResultDoesNotExist,
    #[error("already proposed")]
    AlreadyProposed,
    #[error("user exists already")]
    UserExistsAlready,
    #[error("user proposal limit reached")]
    UserProposalLimitReached,
    #[error("no deposit address")]
    NoDepositAddress,
    #[error("username too long")]
    UsernameTooLong,
    #[error("proposal limit reached")]
    ProposalLimitReached,
    #[error("tweet too long")]
    TweetTooLong,
    #[error("payment in progress")]
    PaymentInProgress,
    #[error("user does not exist")]
    UserDoesNotExist,
    #[error("proposal does not exist")]
    ProposalDoesNotExist,
    #[error("no permission")]
    NoPermission,
    #[error("payment error: {0}")]
    PaymentError(String),
    #[error("no withdrawable e8s")]
    NoWithdrawableE8s,
}

impl CanisterError {
    /// The wire name of the variant.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::AlreadyVoted => "AlreadyVoted",
            Self::RoundResultDoesNotExist => "RoundResultDoesNotExist",
            Self::AlreadyProposed => "AlreadyProposed",
            Self::UserExistsAlready => "UserExistsAlready",
            Self::UserProposalLimitReached => "UserProposalLimitReached",
            Self::NoDepositAddress => "NoDepositAddress",
            Self::UsernameTooLong => "UsernameTooLong",
            Self::ProposalLimitReached => "ProposalLimitReached",
            Self::TweetTooLong => "TweetTooLong",
            Self::PaymentInProgress => "PaymentInProgress",
            Self::UserDoesNotExist => "UserDoesNotExist",
            Self::ProposalDoesNotExist => "ProposalDoesNotExist",
            Self::NoPermission => "NoPermission",
            Self::PaymentError(_) => "PaymentError",
            Self::NoWithdrawableE8s => "NoWithdrawableE8s",
        }
    }

    /// Message shown to the user: the payment failure text, else the variant name.
    pub fn user_message(&self) -> String {
        match self {
            Self::PaymentError(reason) => reason.clone(),
            other => other.variant_name().to_string(),
        }
    }
}

/// Wire shape of a fallible canister call: `{"Ok": v}` or `{"Err": e}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanisterResult<T> {
    Ok(T),
    Err(CanisterError),
}

impl<T> From<CanisterResult<T>> for Result<T, CanisterError> {
    fn from(result: CanisterResult<T>) -> Self {
        match result {
            CanisterResult::Ok(value) => Ok(value),
            CanisterResult::Err(err) => Err(err),
        }
    }
}

impl<T> From<Result<T, CanisterError>> for CanisterResult<T> {
    fn from(result: Result<T, CanisterError>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(err) => Self::Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_prefers_payment_text() {
        assert_eq!(
            CanisterError::PaymentError("ledger down".to_string()).user_message(),
            "ledger down"
        );
        assert_eq!(CanisterError::AlreadyVoted.user_message(), "AlreadyVoted");
    }

    #[test]
    fn result_wire_shape() {
        let ok: CanisterResult<u32> = serde_json::from_str(r#"{"Ok":5}"#).unwrap();
        let ok: Result<u32, CanisterError> = ok.into();
        assert_eq!(ok, Ok(5));

        let err: CanisterResult<u32> =
            serde_json::from_str(r#"{"Err":"UserDoesNotExist"}"#).unwrap();
        let err: Result<u32, CanisterError> = err.into();
        assert_eq!(err, Err(CanisterError::UserDoesNotExist));

        let payment: CanisterResult<()> =
            serde_json::from_str(r#"{"Err":{"PaymentError":"insufficient funds"}}"#).unwrap();
        let payment: Result<(), CanisterError> = payment.into();
        assert_eq!(
            payment,
            Err(CanisterError::PaymentError("insufficient funds".to_string()))
        );
    }
}
