/*! Integration tests for Tether.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - cache: Tests for the dual-indexed SessionCache under concurrency
 * - provider: Tests for the SessionProvider implementations and their composition
 * - manager: Tests for session lifecycle, reference counting and expiry
 * - service: Tests for the externally callable SessionService
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("tether=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod cache;
mod helpers;
mod manager;
mod provider;
mod service;
