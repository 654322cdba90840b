/*! Integration tests for Sealed State.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - subject: Tests for UserStateSubject, organized by concern (identity, updates,
 *   constraints, encryption, lifecycle)
 * - state: Tests for the in-memory backing state driven through a subject
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("sealed_state=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod helpers;
mod state;
