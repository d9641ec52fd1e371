pub mod account_queries;
pub mod execute_transfer;
pub mod open_account;

pub use account_queries::{AccountQueries, QueryError};
pub use execute_transfer::{
    TransferCommand, TransferError, TransferOrchestrator, TransferResult, TransferSettings,
};
pub use open_account::{OpenAccount, OpenAccountError, OpenAccountInput};
