use std::sync::Arc;

use faashost_exchange::{BufferHandle, MemoryExchangeBuffer};
use faashost_sandbox_runtime::core_api::encode_pairs;
use faashost_sandbox_runtime::{
    FunctionExecutionContext, Host, HostConfig, SandboxError, SENTINEL,
};
use faashost_store::ContentId;

const CORE_GUEST: &str = r#"
(module
  (import "core" "get_input_buffer_id" (func $input (result i32)))
  (import "core" "get_output_buffer_id" (func $output (result i32)))
  (import "core" "create_exchange_buffer" (func $create (result i32)))
  (import "core" "get_exchange_buffer_size" (func $size (param i32) (result i32)))
  (import "core" "read_exchange_buffer" (func $read (param i32 i32 i32) (result i32)))
  (import "core" "write_exchange_buffer" (func $write (param i32 i32 i32) (result i32)))
  (import "core" "free_buffer" (func $free (param i32) (result i32)))
  (import "core" "read_exchange_buffer_headers" (func $headers (param i32) (result i32)))
  (import "core" "write_exchange_buffer_header" (func $set_header (param i32 i32 i32 i32 i32) (result i32)))
  (import "core" "write_exchange_buffer_status_code" (func $set_status (param i32 i32) (result i32)))
  (import "core" "base64_encode" (func $b64_encode (param i32 i32) (result i32)))
  (import "core" "base64_decode" (func $b64_decode (param i32 i32) (result i32)))
  (import "core" "persistence_set" (func $persist (param i32 i32 i32 i32) (result i32)))
  (import "core" "persistence_get" (func $recall (param i32 i32) (result i32)))
  (import "core" "persistence_get_subset" (func $recall_prefix (param i32 i32) (result i32)))
  (import "core" "register_blob_with_name" (func $name_blob (param i32 i32 i32 i32 i32 i32) (result i32)))
  (import "core" "get_blob_bytes_as_string" (func $blob_bytes (param i32 i32) (result i32)))
  (import "core" "get_status" (func $status (result i32)))
  (import "core" "get_time" (func $time (param i32 i32) (result i32)))
  (import "core" "call_function" (func $call (param i32 i32 i32 i32 i32 i32 i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "content-type")
  (data (i32.const 16) "text/plain")
  (data (i32.const 32) "abc")
  (data (i32.const 48) "YWJj")
  (data (i32.const 64) "counter")
  (data (i32.const 80) "42")
  (data (i32.const 96) "not base64!")
  (data (i32.const 112) "greeting")
  (data (i32.const 144) "adder")
  (data (i32.const 160) "add")
  (data (i32.const 192) "nobody")

  ;; Copy a result buffer to the output buffer and free it.
  (func $forward (param $handle i32) (result i32)
    (local $len i32)
    (local.set $len (call $size (local.get $handle)))
    (drop (call $read (local.get $handle) (i32.const 1024) (local.get $len)))
    (drop (call $write (call $output) (i32.const 1024) (local.get $len)))
    (call $free (local.get $handle)))

  (func (export "respond") (result i32)
    (drop (call $set_header (call $output) (i32.const 0) (i32.const 12) (i32.const 16) (i32.const 10)))
    (drop (call $set_status (call $output) (i32.const 201)))
    (call $forward (call $headers (call $input))))

  (func (export "encode") (result i32)
    (call $forward (call $b64_encode (i32.const 32) (i32.const 3))))

  (func (export "decode") (result i32)
    (call $forward (call $b64_decode (i32.const 48) (i32.const 4))))

  (func (export "decode_garbage") (result i32)
    (call $b64_decode (i32.const 96) (i32.const 11)))

  (func (export "remember") (result i32)
    (drop (call $persist (i32.const 64) (i32.const 7) (i32.const 80) (i32.const 2)))
    (call $forward (call $recall (i32.const 64) (i32.const 7))))

  (func (export "remember_prefix") (result i32)
    (call $forward (call $recall_prefix (i32.const 64) (i32.const 3))))

  (func (export "forgotten") (result i32)
    (call $recall (i32.const 112) (i32.const 8)))

  (func (export "blobs") (result i32)
    (drop (call $forward
      (call $name_blob (i32.const 112) (i32.const 8) (i32.const 16) (i32.const 10)
        (i32.const 32) (i32.const 3))))
    (call $forward (call $blob_bytes (i32.const 112) (i32.const 8))))

  (func (export "status") (result i32)
    (call $forward (call $status)))

  (func (export "time") (result i32)
    (drop (call $time (i32.const 256) (i32.const 8)))
    (i64.gt_s (i64.load (i32.const 256)) (i64.const 0)))

  (func (export "short_time") (result i32)
    (call $time (i32.const 256) (i32.const 4)))

  (func (export "delegate") (result i32)
    (i32.store (i32.const 176) (i32.const 20))
    (i32.store (i32.const 180) (i32.const 22))
    (call $call (i32.const 144) (i32.const 5) (i32.const 160) (i32.const 3)
      (i32.const 176) (i32.const 2) (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0)))

  (func (export "delegate_to_nobody") (result i32)
    (call $call (i32.const 192) (i32.const 6) (i32.const 160) (i32.const 3)
      (i32.const 176) (i32.const 2) (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0)))

  (func (export "write_out_of_bounds") (result i32)
    (call $write (call $output) (i32.const 70000) (i32.const 4)))

  (func (export "free_unknown") (result i32)
    (call $free (i32.const 9999)))

  (func (export "scratch") (result i32)
    (local $handle i32)
    (local.set $handle (call $create))
    (drop (call $write (local.get $handle) (i32.const 32) (i32.const 3)))
    (call $forward (local.get $handle))))
"#;

const ADDER: &str = r#"
(module
  (func (export "add") (param i32 i32) (result i32)
    local.get 0
    local.get 1
    i32.add))
"#;

fn host_with(config: HostConfig) -> Arc<Host> {
    let host = Host::in_memory(config).unwrap();
    host.register_guest("core-guest", CORE_GUEST).unwrap();
    host.register_guest("adder", ADDER).unwrap();
    host
}

fn host() -> Arc<Host> {
    host_with(HostConfig::default())
}

/// Run `entry` with fresh buffers and return (result, output bytes).
fn run(host: &Arc<Host>, entry: &str) -> (Option<i32>, Vec<u8>) {
    let input = host.registry().create();
    let output = host.registry().create();
    let result = run_with(host, entry, input, output);
    let bytes = take(host, output);
    host.registry().release(input);
    (result, bytes)
}

fn run_with(host: &Arc<Host>, entry: &str, input: BufferHandle, output: BufferHandle) -> Option<i32> {
    let mut context = FunctionExecutionContext::new("core-guest", entry).with_buffers(input, output);
    host.invoke(&mut context).unwrap();
    context.result()
}

fn take(host: &Host, handle: BufferHandle) -> Vec<u8> {
    let bytes = host
        .registry()
        .with_buffer(handle, |buffer| buffer.buffer())
        .unwrap();
    host.registry().release(handle);
    bytes
}

#[test]
fn headers_status_and_body() {
    let host = host();
    let input = host.registry().register(MemoryExchangeBuffer::new());
    host.registry()
        .with_buffer(input, |buffer| {
            buffer.set_header("x-a", "1")?;
            buffer.set_header("x-b", "2")
        })
        .unwrap();
    let output = host.registry().create();

    assert_eq!(run_with(&host, "respond", input, output), Some(0));

    host.registry()
        .with_buffer(output, |buffer| {
            assert_eq!(buffer.header("content-type")?.as_deref(), Some("text/plain"));
            assert_eq!(buffer.status_code()?, 201);
            Ok(())
        })
        .unwrap();
    assert_eq!(take(&host, output), encode_pairs(&[("x-a", "1"), ("x-b", "2")]));
    host.registry().release(input);
    assert_eq!(host.registry().live_count(), 0);
}

#[test]
fn base64_round_trip() {
    let host = host();
    assert_eq!(run(&host, "encode").1, b"YWJj");
    assert_eq!(run(&host, "decode").1, b"abc");
    assert_eq!(run(&host, "decode_garbage").0, Some(SENTINEL as i32));
}

#[test]
fn persistence_is_visible_to_host() {
    let host = host();
    assert_eq!(run(&host, "remember").1, b"42");
    assert_eq!(
        host.persistence().get(b"counter").unwrap().as_deref(),
        Some(&b"42"[..])
    );

    host.persistence().set(b"country", b"nz").unwrap();
    host.persistence().set(b"other", b"x").unwrap();
    assert_eq!(
        run(&host, "remember_prefix").1,
        encode_pairs(&[("counter", "42"), ("country", "nz")])
    );

    assert_eq!(run(&host, "forgotten").0, Some(SENTINEL as i32));
}

#[test]
fn blobs_by_name() {
    let host = host();
    let (_, output) = run(&host, "blobs");
    let expected = format!("{}abc", ContentId::of(b"abc"));
    assert_eq!(String::from_utf8(output).unwrap(), expected);

    let id = host.blobs().resolve_alias("greeting").unwrap();
    let summary = host.blobs().abstract_of(&id).unwrap();
    assert_eq!(summary.content_type, "text/plain");
    assert_eq!(summary.length, 3);
}

#[test]
fn status_reports_buffers_and_blobs() {
    let host = host();
    let (_, output) = run(&host, "status");
    let status: serde_json::Value = serde_json::from_slice(&output).unwrap();

    let blobs = status["blobs"].as_object().unwrap();
    assert!(blobs.contains_key("core-guest"));
    assert!(blobs.contains_key("adder"));
    // Input and output. The snapshot is taken before the reply buffer exists.
    assert_eq!(status["exchange_buffers"]["live"], 2);
    assert_eq!(status["exchange_buffers"]["created"], 2);
}

#[test]
fn time_needs_room_for_eight_bytes() {
    let host = host();
    assert_eq!(run(&host, "time").0, Some(1));
    assert_eq!(run(&host, "short_time").0, Some(SENTINEL as i32));
}

#[test]
fn call_function_runs_another_guest() {
    let host = host();
    assert_eq!(run(&host, "delegate").0, Some(42));
}

#[test]
fn call_function_failure_is_recoverable() {
    let host = host();
    assert_eq!(run(&host, "delegate_to_nobody").0, Some(SENTINEL as i32));
}

#[test]
fn call_function_depth_limit_traps() {
    let host = host_with(HostConfig {
        max_link_depth: 0,
        ..HostConfig::default()
    });
    let mut context = FunctionExecutionContext::new("core-guest", "delegate");
    assert!(matches!(
        host.invoke(&mut context),
        Err(SandboxError::Trap { entry, .. }) if entry == "delegate"
    ));
}

#[test]
fn bad_calls_return_the_sentinel() {
    let host = host();
    assert_eq!(run(&host, "write_out_of_bounds").0, Some(SENTINEL as i32));
    assert_eq!(run(&host, "free_unknown").0, Some(SENTINEL as i32));
}

#[test]
fn scratch_buffers_are_freed() {
    let host = host();
    assert_eq!(run(&host, "scratch").1, b"abc");
    assert_eq!(host.registry().live_count(), 0);
}

#[test]
fn prepare_compiles_only_the_loaded_guest() {
    let host = host();
    let mut context = FunctionExecutionContext::new("core-guest", "status");
    let sandbox = host.prepare(&mut context).unwrap();
    assert_eq!(sandbox.state().invocation().depth, 0);
    drop(sandbox);
    assert_eq!(host.cached_modules(), 1);
}
