//! Fatal error reporting

use tracing::error;

/// Report a fatal error and exit with its status code
///
/// `QapError`s print their user message and use their own exit code; with
/// `-v` the full cause chain follows. Anything else exits with 1.
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    std::process::exit(report_fatal_error(&error, verbose))
}

/// Print `error` to stderr and return the exit code it maps to
pub fn report_fatal_error(error: &anyhow::Error, verbose: u8) -> i32 {
    use crate::error::QapError;

    error!("Fatal error: {}", error);

    if let Some(qap_err) = error.downcast_ref::<QapError>() {
        eprintln!("{}", qap_err.user_message());
        if verbose >= 1 {
            eprintln!("\nContext Chain:\n{}", qap_err.developer_message());
        }
        qap_err.exit_code()
    } else {
        eprintln!("Error: {error}");
        if verbose >= 1 {
            eprintln!("\nError chain:");
            for (i, cause) in error.chain().enumerate() {
                eprintln!("  {}: {}", i, cause);
            }
        }
        1
    }
}
