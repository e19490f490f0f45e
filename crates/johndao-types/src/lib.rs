//! Shared types, error definitions, and constants for John DAO.
//!
//! This crate provides the foundational types used across the workspace:
//! principals, the records exchanged with the voting canister, the domain
//! error taxonomy (via `thiserror`), the shape of the per-user session
//! document, and the user-scoped state variant.
//!
//! No crate in the workspace depends on anything *except* `johndao-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

mod canister;
mod error;
mod principal;
mod session;

pub use canister::{
    Badge, ChangedUsers, CreateProposalArg, CreateUserArg, LoginMethod, ProposalInfo, Tweet,
    Settings, UpvoteStatus, User, VerificationStatus, Vote,
};
pub use error::{CanisterError, CanisterResult};
pub use principal::{Principal, PrincipalError, MAX_PRINCIPAL_BYTES};
pub use session::{user_doc_path, AuthMethod, UserDoc, UserState, USERS_COLLECTION};

/// Document holding the moderation blocklist.
pub const BLOCKLIST_DOC: &str = "blocklist/blocklistdoc";

/// Document recording the last completed user backup.
pub const BACKUP_STATE_DOC: &str = "backups/state";
