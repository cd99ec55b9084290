//! Ops exposed to the render sandbox and the `ssr_runtime` extension.
//!
//! The sandbox only gets what a server bundle needs to render a page:
//! captured console output, a few `crypto` helpers, `atob`/`btoa`, and the
//! allowlisted `fetch` from [`crate::fetch`].

use crate::fetch::op_fetch;
use deno_core::{anyhow::anyhow, error::AnyError, op2, OpState};

// ============================================================================
// Console Output Capture
// ============================================================================

/// Console output captured during one render.
#[derive(Debug, Default, Clone)]
pub struct ConsoleOutput {
    pub logs: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
}

impl ConsoleOutput {
    /// Re-emit captured lines through `tracing`, tagged with the rendered URL.
    pub fn emit(&self, url: &str) {
        for line in &self.logs {
            tracing::info!(target: "chrononews_ssr::console", url, "{line}");
        }
        for line in &self.warns {
            tracing::warn!(target: "chrononews_ssr::console", url, "{line}");
        }
        for line in &self.errors {
            tracing::error!(target: "chrononews_ssr::console", url, "{line}");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty() && self.warns.is_empty() && self.errors.is_empty()
    }
}

#[op2(fast)]
pub fn op_console_log(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.logs.push(msg.to_string());
    }
}

#[op2(fast)]
pub fn op_console_warn(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.warns.push(msg.to_string());
    }
}

#[op2(fast)]
pub fn op_console_error(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.errors.push(msg.to_string());
    }
}

// ============================================================================
// Crypto Ops
// ============================================================================

#[op2]
#[string]
pub fn op_crypto_random_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[op2(fast)]
pub fn op_crypto_get_random_values(#[buffer] buf: &mut [u8]) {
    use rand::RngCore;
    rand::thread_rng().fill_bytes(buf);
}

#[op2]
#[buffer]
pub fn op_crypto_subtle_digest(
    #[string] algorithm: &str,
    #[buffer] data: &[u8],
) -> Result<Vec<u8>, AnyError> {
    digest(algorithm, data)
}

fn digest(algorithm: &str, data: &[u8]) -> Result<Vec<u8>, AnyError> {
    use sha2::{Digest, Sha256, Sha384, Sha512};

    let digest = match algorithm.to_uppercase().replace('-', "").as_str() {
        "SHA256" => Sha256::digest(data).to_vec(),
        "SHA384" => Sha384::digest(data).to_vec(),
        "SHA512" => Sha512::digest(data).to_vec(),
        _ => {
            return Err(anyhow!(
                "Unsupported algorithm: {}. Supported: SHA-256, SHA-384, SHA-512",
                algorithm
            ))
        }
    };

    Ok(digest)
}

// ============================================================================
// Encoding Ops
// ============================================================================

#[op2]
#[string]
pub fn op_btoa(#[string] data: &str) -> String {
    use base64::Engine;
    // btoa expects Latin-1; UTF-8 input is accepted as-is
    base64::engine::general_purpose::STANDARD.encode(data.as_bytes())
}

#[op2]
#[string]
pub fn op_atob(#[string] data: &str) -> Result<String, AnyError> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| anyhow!("Invalid base64: {}", e))?;
    String::from_utf8(bytes).map_err(|e| anyhow!("Invalid UTF-8 in decoded data: {}", e))
}

// ============================================================================
// Extension Definition
// ============================================================================

deno_core::extension!(
    ssr_runtime,
    ops = [
        op_console_log,
        op_console_warn,
        op_console_error,
        op_crypto_random_uuid,
        op_crypto_get_random_values,
        op_crypto_subtle_digest,
        op_btoa,
        op_atob,
        op_fetch,
    ],
    esm_entry_point = "ext:ssr_runtime/bootstrap.js",
    esm = ["ext:ssr_runtime/bootstrap.js" = "src/bootstrap.js"],
);
