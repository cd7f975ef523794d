//! The `core` host API: exchange buffers, blobs, persistence and
//! sub-invocations.
//!
//! Results larger than an integer come back in a fresh exchange buffer whose
//! handle is returned; the guest reads it with `read_exchange_buffer` and
//! frees it. Failures return [`SENTINEL`](crate::abi::SENTINEL).

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use faashost_exchange::{BufferHandle, MemoryExchangeBuffer};

use crate::abi::CallSite;
use crate::context::{ExecutionMode, FunctionExecutionContext};
use crate::error::{HostCallError, Result, SandboxError};
use crate::provider::{ApiProvider, Binder};
use crate::signature::Signature;

/// Module name the `core` API is registered under.
pub const MODULE: &str = "core";

type CallResult = std::result::Result<u32, HostCallError>;

/// Provider for the `core` module.
pub struct CoreApi;

impl ApiProvider for CoreApi {
    fn bind(&self, binder: &mut Binder<'_>) -> Result<()> {
        let ops: [(&str, usize, fn(&mut CallSite<'_>) -> CallResult); 24] = [
            ("get_input_buffer_id", 0, get_input_buffer_id),
            ("get_output_buffer_id", 0, get_output_buffer_id),
            ("create_exchange_buffer", 0, create_exchange_buffer),
            ("free_buffer", 1, free_buffer),
            ("write_exchange_buffer", 3, write_exchange_buffer),
            ("write_exchange_buffer_header", 5, write_exchange_buffer_header),
            ("write_exchange_buffer_status_code", 2, write_exchange_buffer_status_code),
            ("get_exchange_buffer_size", 1, get_exchange_buffer_size),
            ("read_exchange_buffer", 3, read_exchange_buffer),
            ("read_exchange_buffer_headers", 1, read_exchange_buffer_headers),
            ("base64_encode", 2, base64_encode),
            ("base64_decode", 2, base64_decode),
            ("register_blob", 4, register_blob),
            ("register_blob_with_name", 6, register_blob_with_name),
            ("get_blob_tech_id_from_name", 2, get_blob_tech_id_from_name),
            ("get_blob_bytes_as_string", 2, get_blob_bytes_as_string),
            ("persistence_set", 4, persistence_set),
            ("persistence_get", 2, persistence_get),
            ("persistence_get_subset", 2, persistence_get_subset),
            ("get_url", 2, get_url),
            ("print_debug", 2, print_debug),
            ("get_time", 2, get_time),
            ("get_status", 0, get_status),
            ("call_function", 10, call_function),
        ];
        for (name, arity, op) in ops {
            binder.bind(name, Signature::i32s(arity), op)?;
        }
        Ok(())
    }
}

/// Put `bytes` in a new exchange buffer and return its handle.
fn result_buffer(site: &CallSite<'_>, bytes: impl Into<Vec<u8>>) -> u32 {
    site.state()
        .registry()
        .register(MemoryExchangeBuffer::with_content(bytes))
}

/// Length-prefixed pair encoding shared by headers and persistence subsets:
/// `u32 2*n`, then `u32 len, key, u32 len, value` per pair.
pub fn encode_pairs<K: AsRef<[u8]>, V: AsRef<[u8]>>(pairs: &[(K, V)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(2 * pairs.len() as u32).to_le_bytes());
    for (key, value) in pairs {
        for part in [key.as_ref(), value.as_ref()] {
            out.extend_from_slice(&(part.len() as u32).to_le_bytes());
            out.extend_from_slice(part);
        }
    }
    out
}

fn get_input_buffer_id(site: &mut CallSite<'_>) -> CallResult {
    Ok(site.state().invocation().input)
}

fn get_output_buffer_id(site: &mut CallSite<'_>) -> CallResult {
    Ok(site.state().invocation().output)
}

fn create_exchange_buffer(site: &mut CallSite<'_>) -> CallResult {
    Ok(site.state().registry().create())
}

fn free_buffer(site: &mut CallSite<'_>) -> CallResult {
    let handle = site.param_u32(0)?;
    if site.state().registry().release(handle) {
        Ok(0)
    } else {
        Err(faashost_exchange::ExchangeError::UnknownHandle(handle).into())
    }
}

fn write_exchange_buffer(site: &mut CallSite<'_>) -> CallResult {
    let handle = site.param_u32(0)?;
    let bytes = site.param_byte_buffer(1, 2)?;
    let written = site
        .state()
        .registry()
        .with_buffer(handle, |buffer| buffer.write(bytes))?;
    Ok(written as u32)
}

fn write_exchange_buffer_header(site: &mut CallSite<'_>) -> CallResult {
    let handle = site.param_u32(0)?;
    let name = site.param_string(1, 2)?;
    let value = site.param_string(3, 4)?;
    site.state()
        .registry()
        .with_buffer(handle, |buffer| buffer.set_header(name, value))?;
    Ok(0)
}

fn write_exchange_buffer_status_code(site: &mut CallSite<'_>) -> CallResult {
    let handle = site.param_u32(0)?;
    let status = u16::try_from(site.param_u32(1)?).map_err(HostCallError::recoverable)?;
    site.state()
        .registry()
        .with_buffer(handle, |buffer| buffer.write_status_code(status))?;
    Ok(0)
}

fn get_exchange_buffer_size(site: &mut CallSite<'_>) -> CallResult {
    let handle = site.param_u32(0)?;
    let content = site
        .state()
        .registry()
        .with_buffer(handle, |buffer| buffer.buffer())?;
    Ok(content.len() as u32)
}

fn read_exchange_buffer(site: &mut CallSite<'_>) -> CallResult {
    let handle = site.param_u32(0)?;
    let ptr = site.param_u32(1)?;
    let len = site.param_u32(2)?;
    let content = site
        .state()
        .registry()
        .with_buffer(handle, |buffer| buffer.buffer())?;
    if content.len() <= len as usize {
        site.memory_mut().write(ptr, &content)?;
    }
    Ok(content.len() as u32)
}

fn read_exchange_buffer_headers(site: &mut CallSite<'_>) -> CallResult {
    let handle = site.param_u32(0)?;
    let mut pairs = Vec::new();
    site.state().registry().with_buffer(handle, |buffer| {
        buffer.headers(&mut |name, value| pairs.push((name.to_string(), value.to_string())))
    })?;
    Ok(result_buffer(site, encode_pairs(&pairs)))
}

fn base64_encode(site: &mut CallSite<'_>) -> CallResult {
    let encoded = STANDARD.encode(site.param_byte_buffer(0, 1)?);
    Ok(result_buffer(site, encoded))
}

fn base64_decode(site: &mut CallSite<'_>) -> CallResult {
    let decoded = STANDARD
        .decode(site.param_byte_buffer(0, 1)?)
        .map_err(HostCallError::recoverable)?;
    Ok(result_buffer(site, decoded))
}

fn register_blob(site: &mut CallSite<'_>) -> CallResult {
    let content_type = site.param_string(0, 1)?;
    let bytes = site.param_byte_buffer(2, 3)?;
    let id = site.state().host().blobs().register_blob(content_type, bytes)?;
    Ok(result_buffer(site, id.to_string()))
}

fn register_blob_with_name(site: &mut CallSite<'_>) -> CallResult {
    let name = site.param_string(0, 1)?;
    let content_type = site.param_string(2, 3)?;
    let bytes = site.param_byte_buffer(4, 5)?;
    let id = site
        .state()
        .host()
        .blobs()
        .register_blob_with_name(name, content_type, bytes)?;
    Ok(result_buffer(site, id.to_string()))
}

fn get_blob_tech_id_from_name(site: &mut CallSite<'_>) -> CallResult {
    let name = site.param_string(0, 1)?;
    let id = site.state().host().blobs().resolve_alias(name)?;
    Ok(result_buffer(site, id.to_string()))
}

fn get_blob_bytes_as_string(site: &mut CallSite<'_>) -> CallResult {
    let reference = site.param_string(0, 1)?;
    let blobs = site.state().host().blobs();
    let bytes = blobs.get_bytes(&blobs.resolve_reference(reference)?)?;
    Ok(result_buffer(site, bytes))
}

fn persistence_set(site: &mut CallSite<'_>) -> CallResult {
    let key = site.param_byte_buffer(0, 1)?;
    let value = site.param_byte_buffer(2, 3)?;
    site.state().host().persistence().set(key, value)?;
    Ok(0)
}

fn persistence_get(site: &mut CallSite<'_>) -> CallResult {
    let key = site.param_byte_buffer(0, 1)?;
    let value = site
        .state()
        .host()
        .persistence()
        .get(key)?
        .ok_or_else(|| HostCallError::recoverable(format!("no value for key {}", String::from_utf8_lossy(key))))?;
    Ok(result_buffer(site, value))
}

fn persistence_get_subset(site: &mut CallSite<'_>) -> CallResult {
    let prefix = site.param_byte_buffer(0, 1)?;
    let pairs = site.state().host().persistence().subset(prefix)?;
    Ok(result_buffer(site, encode_pairs(&pairs)))
}

fn get_url(site: &mut CallSite<'_>) -> CallResult {
    let url = site.param_string(0, 1)?;
    let host = site.state().host();
    let body = host
        .http_client()
        .and_then(|client| client.get(url).send())
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.bytes())
        .map_err(HostCallError::recoverable)?;
    Ok(result_buffer(site, body.to_vec()))
}

fn print_debug(site: &mut CallSite<'_>) -> CallResult {
    let text = site.param_byte_buffer(0, 1)?;
    tracing::info!(
        target: "faashost::guest",
        invocation = %site.state().invocation().id,
        "{}",
        String::from_utf8_lossy(text)
    );
    Ok(0)
}

fn get_time(site: &mut CallSite<'_>) -> CallResult {
    let ptr = site.param_u32(0)?;
    let len = site.param_u32(1)?;
    if len < 8 {
        return Err(HostCallError::recoverable("get_time needs 8 bytes"));
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(HostCallError::recoverable)?
        .as_nanos() as i64;
    site.memory_mut().write_u64(ptr, nanos as u64)?;
    Ok(0)
}

/// Registry counters are read before the reply buffer is registered, so the
/// reply itself is never counted.
fn get_status(site: &mut CallSite<'_>) -> CallResult {
    let host = site.state().host();
    let stats = host.registry().stats();
    let blobs: serde_json::Map<String, serde_json::Value> = host
        .blobs()
        .names()?
        .into_iter()
        .map(|(name, id)| (name, serde_json::Value::String(id.to_string())))
        .collect();
    let status = serde_json::json!({
        "exchange_buffers": {
            "created": stats.created,
            "released": stats.released,
            "live": stats.live,
        },
        "blobs": blobs,
    });
    let json = serde_json::to_vec(&status).map_err(HostCallError::recoverable)?;
    Ok(result_buffer(site, json))
}

/// Read `count` little-endian i32 values at `ptr`.
fn read_i32_array(site: &CallSite<'_>, ptr: u32, count: u32) -> std::result::Result<Vec<i32>, HostCallError> {
    let bytes = site.memory().slice(ptr, count.saturating_mul(4))?;
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn call_function(site: &mut CallSite<'_>) -> CallResult {
    let alias = site.param_string(0, 1)?.to_string();
    let entry = site.param_string(2, 3)?.to_string();
    let arguments = read_i32_array(site, site.param_u32(4)?, site.param_u32(5)?)?;
    let mode = site.param_string(6, 7)?;
    let mode = ExecutionMode::parse(mode)
        .ok_or_else(|| HostCallError::recoverable(format!("unknown execution mode '{}'", mode)))?;
    let input: BufferHandle = site.param_u32(8)?;
    let output: BufferHandle = site.param_u32(9)?;

    let host = site.state().host().clone();
    let mut nested = FunctionExecutionContext::nested(site.state().invocation(), alias, entry)
        .with_arguments(arguments)
        .with_mode(mode)
        .with_buffers(input, output);

    match host.invoke(&mut nested) {
        Ok(()) => Ok(nested.result().unwrap_or(0) as u32),
        Err(error @ SandboxError::LinkDepthExceeded { .. }) => Err(HostCallError::fatal(error)),
        Err(error) => Err(HostCallError::recoverable(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_encoding() {
        let mut expected = 2u32.to_le_bytes().to_vec();
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(b"a");
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(b"xy");
        assert_eq!(encode_pairs(&[("a", "xy")]), expected);
    }

    #[test]
    fn empty_pair_encoding() {
        let pairs: [(&str, &str); 0] = [];
        assert_eq!(encode_pairs(&pairs), 0u32.to_le_bytes());
    }
}
