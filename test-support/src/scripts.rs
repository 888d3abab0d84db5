//! Tiny `/bin/sh` servers for exercising real child processes.
//!
//! Requests are written by the client as
//! `{"jsonrpc":"2.0","method":"...","params":{...},"id":N}`, so the id is
//! always the last member of the line.

/// Answers every request with `{"method": <method>}`; skips notifications.
pub const ECHO_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\)}$/\1/p')
  [ -z "$id" ] && continue
  method=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","method":"\([^"]*\)".*/\1/p')
  printf '{"jsonrpc":"2.0","result":{"method":"%s"},"id":%s}\n' "$method" "$id"
done
"#;

/// A project listing that succeeds, then a task
/// creation that the server rejects. Says goodbye once its input closes.
pub const PROJECTS_SERVER: &str = r#"
IFS= read -r line
printf '%s\n' '{"jsonrpc":"2.0","result":{"projects":[]},"id":1}'
IFS= read -r line
printf '%s\n' '{"jsonrpc":"2.0","error":{"code":-32602,"message":"project not found"},"id":2}'
cat >/dev/null
printf '%s\n' 'goodbye'
"#;

/// Reports `MCP_TEST_VALUE` and whether `PATH` was inherited.
pub const ENV_SERVER: &str = r#"
IFS= read -r line
printf '{"jsonrpc":"2.0","result":{"value":"%s","path":"%s"},"id":1}\n' "$MCP_TEST_VALUE" "${PATH:+inherited}"
cat >/dev/null
"#;

/// Reports its working directory.
pub const PWD_SERVER: &str = r#"
IFS= read -r line
printf '{"jsonrpc":"2.0","result":{"cwd":"%s"},"id":1}\n' "$(pwd)"
cat >/dev/null
"#;

/// Reads one request and exits with status 3 without answering.
pub const CRASHING_SERVER: &str = r#"
IFS= read -r line
echo 'about to crash' >&2
exit 3
"#;

/// Ignores its input and never exits on its own.
pub const STUBBORN_SERVER: &str = "exec sleep 30";

/// Answers request 1 with a garbage line followed by the real response.
pub const GARBLED_SERVER: &str = r#"
IFS= read -r line
printf '%s\n' 'this is not json'
printf '%s\n' '{"jsonrpc":"2.0","result":{"late":true},"id":1}'
cat >/dev/null
"#;
