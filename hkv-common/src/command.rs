//! # Command table
//!
//! A static registry describing every command this core understands: its
//! arity, its read/write/fast/admin flags, and which argument positions hold
//! keys. The dispatcher in `hkv-server` uses `first_key`/`last_key`/`key_step`
//! to extract the key set for a command without hand-coding it per handler,
//! and uses the flags to reject cross-slot multi-key commands and to route
//! admin commands to the admin shard.
//!
//! `PING`, `INFO`, and `QUIT` are usually handled inline ahead of dispatch
//! in servers like this one, but are given proper entries here so they
//! participate in the same admin-routing path as `CLUSTER`.

/// Command flags, mirroring the single-character `sflags` codes in the
/// original command table (`r`/`w`/`m`/`a`/`F`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandFlags {
    pub readonly: bool,
    pub write: bool,
    /// May increase memory usage; rejected when the server is over its
    /// memory limit.
    pub deny_oom: bool,
    pub admin: bool,
    /// O(1)/O(log N); never a source of unexpected latency.
    pub fast: bool,
}

impl CommandFlags {
    const fn r() -> Self {
        CommandFlags { readonly: true, write: false, deny_oom: false, admin: false, fast: false }
    }
    const fn rf() -> Self {
        CommandFlags { fast: true, ..Self::r() }
    }
    const fn w() -> Self {
        CommandFlags { readonly: false, write: true, deny_oom: false, admin: false, fast: false }
    }
    const fn wm() -> Self {
        CommandFlags { deny_oom: true, ..Self::w() }
    }
    const fn wmf() -> Self {
        CommandFlags { fast: true, ..Self::wm() }
    }
    const fn wf() -> Self {
        CommandFlags { fast: true, ..Self::w() }
    }
    const fn admin() -> Self {
        CommandFlags { readonly: false, write: false, deny_oom: false, admin: true, fast: false }
    }
    const fn admin_fast() -> Self {
        CommandFlags { fast: true, ..Self::admin() }
    }
}

/// One command table entry. `arity` follows the original convention: a
/// positive value is the exact argument count (including the command name
/// itself); a negative value `-N` means "at least `N`".
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub arity: i32,
    pub flags: CommandFlags,
    pub first_key: i32,
    pub last_key: i32,
    pub key_step: i32,
}

impl CommandSpec {
    /// Checks `argc` (the request's total argument count, including the
    /// command name) against this command's arity rule.
    pub fn arity_ok(&self, argc: usize) -> bool {
        let argc = argc as i32;
        if self.arity >= 0 {
            argc == self.arity
        } else {
            argc >= -self.arity
        }
    }

    /// Resolves the key positions for a request with `argc` arguments,
    /// accounting for variadic commands whose `last_key` of `-1` means "the
    /// last argument".
    pub fn key_positions(&self, argc: usize) -> Vec<usize> {
        if self.first_key == 0 || self.key_step == 0 {
            return Vec::new();
        }
        let last = if self.last_key < 0 {
            argc as i32 + self.last_key
        } else {
            self.last_key
        };
        let mut positions = Vec::new();
        let mut i = self.first_key;
        while i <= last {
            positions.push(i as usize);
            i += self.key_step;
        }
        positions
    }
}

const fn spec(
    name: &'static str,
    arity: i32,
    flags: CommandFlags,
    first_key: i32,
    last_key: i32,
    key_step: i32,
) -> CommandSpec {
    CommandSpec { name, arity, flags, first_key, last_key, key_step }
}

static COMMAND_TABLE: &[CommandSpec] = &[
    spec("get", 2, CommandFlags::rf(), 1, 1, 1),
    spec("set", -3, CommandFlags::wm(), 1, 1, 1),
    spec("setnx", 3, CommandFlags::wmf(), 1, 1, 1),
    spec("setex", 4, CommandFlags::wm(), 1, 1, 1),
    spec("append", 3, CommandFlags::wm(), 1, 1, 1),
    spec("strlen", 2, CommandFlags::rf(), 1, 1, 1),
    spec("del", -2, CommandFlags::w(), 1, -1, 1),
    spec("exists", -2, CommandFlags::rf(), 1, -1, 1),
    spec("hset", 4, CommandFlags::wmf(), 1, 1, 1),
    spec("hsetnx", 4, CommandFlags::wmf(), 1, 1, 1),
    spec("hget", 3, CommandFlags::rf(), 1, 1, 1),
    spec("hmset", -4, CommandFlags::wm(), 1, 1, 1),
    spec("hmget", -3, CommandFlags::r(), 1, 1, 1),
    spec("hdel", -3, CommandFlags::wf(), 1, 1, 1),
    spec("hlen", 2, CommandFlags::rf(), 1, 1, 1),
    spec("hstrlen", 3, CommandFlags::rf(), 1, 1, 1),
    spec("hkeys", 2, CommandFlags::r(), 1, 1, 1),
    spec("hvals", 2, CommandFlags::r(), 1, 1, 1),
    spec("hgetall", 2, CommandFlags::r(), 1, 1, 1),
    spec("hexists", 3, CommandFlags::rf(), 1, 1, 1),
    spec("ttl", 2, CommandFlags::rf(), 1, 1, 1),
    spec("expire", 3, CommandFlags::wf(), 1, 1, 1),
    spec("cluster", -2, CommandFlags::admin(), 0, 0, 0),
    spec("ping", -1, CommandFlags::admin_fast(), 0, 0, 0),
    spec("info", -1, CommandFlags::admin_fast(), 0, 0, 0),
    spec("quit", 1, CommandFlags::admin_fast(), 0, 0, 0),
];

/// Looks up a command by name, case-insensitively.
pub fn lookup_command(name: &[u8]) -> Option<&'static CommandSpec> {
    COMMAND_TABLE
        .iter()
        .find(|c| c.name.as_bytes().eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_case_insensitively() {
        assert!(lookup_command(b"GET").is_some());
        assert!(lookup_command(b"get").is_some());
        assert!(lookup_command(b"nonexistent").is_none());
    }

    #[test]
    fn variadic_del_accepts_any_count_above_minimum() {
        let del = lookup_command(b"del").unwrap();
        assert!(!del.arity_ok(1));
        assert!(del.arity_ok(2));
        assert!(del.arity_ok(5));
    }

    #[test]
    fn fixed_arity_get_rejects_wrong_count() {
        let get = lookup_command(b"get").unwrap();
        assert!(get.arity_ok(2));
        assert!(!get.arity_ok(3));
    }

    #[test]
    fn del_key_positions_span_to_last_argument() {
        let del = lookup_command(b"del").unwrap();
        assert_eq!(del.key_positions(4), vec![1, 2, 3]);
    }

    #[test]
    fn admin_commands_have_no_key_positions() {
        let cluster = lookup_command(b"cluster").unwrap();
        assert!(cluster.key_positions(3).is_empty());
        assert!(cluster.flags.admin);
    }
}
