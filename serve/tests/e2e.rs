//! End-to-end harness entry point; `cargo test` picks up every file under
//! `tests/e2e/` as a submodule of this one integration-test binary, same
//! layout as the teacher's `serve/tests/e2e.rs` + `tests/e2e/*.rs`.

mod chat_trivial;
mod common;
mod health;
mod mcp_privacy;
mod trigger_tool_call;
