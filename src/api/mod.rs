pub mod cli;
pub mod http;

pub use cli::{Cli, CliError, CliHandler, Commands};
pub use http::{
    get_balance, get_balances, get_status, get_transfers, router, ApiError, ApiServer, AppState,
    ErrorResponse, StatusResponse,
};
