//! Integration tests: full cycles over in-memory fakes.

mod mock_market;
mod scenarios;
