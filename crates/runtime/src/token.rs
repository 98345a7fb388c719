//! Correlation token generation.
//!
//! Request and session paths embed a caller-chosen token. Generation sits
//! behind [`TokenGenerator`] so tests can make paths deterministic.

use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;

/// Prefix shared by every generated token.
pub const TOKEN_PREFIX: &str = "portal";

/// Source of handle tokens (`handle_token`, `session_handle_token`).
pub trait TokenGenerator: Send + Sync {
	fn next_token(&self) -> String;
}

/// `portal<N>` with `N` drawn uniformly from `0..i32::MAX`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomTokens;

impl TokenGenerator for RandomTokens {
	fn next_token(&self) -> String {
		let n: i32 = rand::rng().random_range(0..i32::MAX);
		format!("{TOKEN_PREFIX}{n}")
	}
}

/// `portal0`, `portal1`, ... in call order.
#[derive(Debug, Default)]
pub struct SequentialTokens {
	next: AtomicU32,
}

impl SequentialTokens {
	pub fn new() -> Self {
		Self::default()
	}

	/// Starts counting at `first`.
	pub fn starting_at(first: u32) -> Self {
		Self {
			next: AtomicU32::new(first),
		}
	}
}

impl TokenGenerator for SequentialTokens {
	fn next_token(&self) -> String {
		let n = self.next.fetch_add(1, Ordering::SeqCst);
		format!("{TOKEN_PREFIX}{n}")
	}
}
