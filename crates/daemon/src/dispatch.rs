//! The dispatcher: turns a completed [`protocol::Command`] into a table
//! operation plus a reply, and is the sole caller of the resize authority —
//! a table never grows itself, only in response to a dispatcher decision.
//!
//! `DEL` and `EXPIRED` both fully execute their underlying table operation
//! rather than merely matching on the verb and returning `OK` regardless,
//! which a naive transliteration of a verb-dispatch table is prone to
//! getting wrong.

use protocol::{Command, Limits, ProtocolError, Reply};
use store::{Outcome, Table, ValueBuf, MAX_KEY_LEN};

/// What the caller (the connection loop) should do after a dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Reply has been appended; keep reading from this connection.
    Continue,
    /// An `Internal` post-condition failure occurred; the reply has been
    /// appended and the connection must now be closed.
    Close,
}

/// Dispatches one command against `table`, appending exactly one reply to
/// `out`. `now` is the caller's current wall-clock-seconds reading, taken
/// once per command so every operation within this call sees the same
/// instant.
pub fn dispatch(table: &mut Table, limits: &Limits, now: u32, command: Command<'_>, out: &mut Vec<u8>) -> Directive {
    let verb = command.verb();
    let args = command.args();
    match (verb.len(), verb) {
        (3, b"SET") => handle_set(table, args, now, out),
        (3, b"GET") => handle_get(table, args, now, out),
        (3, b"DEL") => handle_del(table, args, now, out),
        (7, b"EXPIRED") => handle_expired(table, args, now, out),
        _ => {
            let _ = limits;
            Reply::Error(ProtocolError::UnknownCommand).encode(out);
            Directive::Continue
        }
    }
}

fn invalid_key(key: &[u8]) -> bool {
    key.is_empty() || key.len() > MAX_KEY_LEN
}

/// Parses an unsigned decimal `u32` the same way the frame lexer parses
/// header lengths: a 64-bit accumulator with an overflow check, rejected if
/// the final value doesn't fit a `u32` TTL.
fn parse_ttl_seconds(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if !b.is_ascii_digit() {
            return None;
        }
        let digit = u64::from(b - b'0');
        if i >= 18 {
            value = value.checked_mul(10)?.checked_add(digit)?;
        } else {
            value = value * 10 + digit;
        }
    }
    u32::try_from(value).ok()
}

/// The wire TTL is an absolute-seconds deadline; `Table` takes a duration
/// relative to `now`. `0` means "never expires" on both sides. A deadline
/// already at or before `now` becomes a zero-length relative TTL, which
/// `Table` treats as already expired — a `SET` with a past deadline is
/// immediately a miss on the next `GET`.
fn parse_ttl_relative(bytes: &[u8], now: u32) -> Option<Option<u32>> {
    let deadline = parse_ttl_seconds(bytes)?;
    Some(if deadline == 0 { None } else { Some(deadline.saturating_sub(now)) })
}

fn handle_set(table: &mut Table, args: &[&[u8]], now: u32, out: &mut Vec<u8>) -> Directive {
    let (key_bytes, value_bytes, ttl_bytes) = match args {
        [k, v] => (*k, *v, None),
        [k, v, t] => (*k, *v, Some(*t)),
        _ => {
            Reply::Error(ProtocolError::BadArity).encode(out);
            return Directive::Continue;
        }
    };
    if invalid_key(key_bytes) {
        Reply::Error(ProtocolError::InvalidKey).encode(out);
        return Directive::Continue;
    }
    let ttl = match ttl_bytes {
        None => None,
        Some(bytes) => match parse_ttl_relative(bytes, now) {
            Some(ttl) => ttl,
            None => {
                Reply::Error(ProtocolError::BadInteger).encode(out);
                return Directive::Continue;
            }
        },
    };

    let mut key = Box::from(key_bytes);
    let mut value = ValueBuf::from_bytes(value_bytes);
    let mut already_grown = false;
    let outcome = loop {
        match table.insert(key, value, ttl, now) {
            Ok(Outcome::Full { key: k, value: v }) => {
                if already_grown {
                    // A successful grow always doubles capacity, which
                    // always satisfies the 0.7 load-factor check on the
                    // retry. Getting here means that invariant broke.
                    Reply::Error(ProtocolError::Internal).encode(out);
                    return Directive::Close;
                }
                let Some(new_capacity) = table.capacity().checked_mul(2) else {
                    Reply::Error(ProtocolError::OutOfMemory).encode(out);
                    return Directive::Continue;
                };
                let old_capacity = table.capacity();
                // Authorized resize: the dispatcher, not the table,
                // decides when and how much to grow.
                if table.grow(new_capacity).is_err() {
                    Reply::Error(ProtocolError::OutOfMemory).encode(out);
                    return Directive::Continue;
                }
                logging::on_resize(old_capacity, new_capacity);
                key = k;
                value = v;
                already_grown = true;
            }
            Ok(other) => break other,
            Err(err) => unreachable!("key length is screened above insert: {err}"),
        }
    };

    match outcome {
        Outcome::Inserted | Outcome::InsertedOverReleased => Reply::Ok.encode(out),
        Outcome::Replaced(reclaim) | Outcome::InsertedOverExpired(reclaim) => {
            drop(reclaim);
            Reply::Ok.encode(out);
        }
        Outcome::Full { .. } => unreachable!("Full is consumed by the retry loop above"),
    }
    Directive::Continue
}

fn handle_get(table: &Table, args: &[&[u8]], now: u32, out: &mut Vec<u8>) -> Directive {
    let [key] = args else {
        Reply::Error(ProtocolError::BadArity).encode(out);
        return Directive::Continue;
    };
    if invalid_key(key) {
        Reply::Error(ProtocolError::InvalidKey).encode(out);
        return Directive::Continue;
    }
    match table.get(key, now) {
        Some(value) => Reply::Value(value).encode(out),
        None => Reply::Miss.encode(out),
    }
    Directive::Continue
}

fn handle_del(table: &mut Table, args: &[&[u8]], now: u32, out: &mut Vec<u8>) -> Directive {
    let [key] = args else {
        Reply::Error(ProtocolError::BadArity).encode(out);
        return Directive::Continue;
    };
    if invalid_key(key) {
        Reply::Error(ProtocolError::InvalidKey).encode(out);
        return Directive::Continue;
    }
    // A miss is a no-op: `take` returns `None` and nothing is freed beyond
    // what the slot already owned.
    drop(table.take(key, now));
    Reply::Ok.encode(out);
    Directive::Continue
}

fn handle_expired(table: &mut Table, args: &[&[u8]], now: u32, out: &mut Vec<u8>) -> Directive {
    let [key, ttl_bytes] = args else {
        Reply::Error(ProtocolError::BadArity).encode(out);
        return Directive::Continue;
    };
    if invalid_key(key) {
        Reply::Error(ProtocolError::InvalidKey).encode(out);
        return Directive::Continue;
    }
    let ttl = match parse_ttl_relative(ttl_bytes, now) {
        Some(ttl) => ttl,
        None => {
            Reply::Error(ProtocolError::BadInteger).encode(out);
            return Directive::Continue;
        }
    };
    // A miss is a no-op, same as DEL; touch never allocates either way.
    let _ = table.touch(key, ttl, now);
    Reply::Ok.encode(out);
    Directive::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{AggOutcome, Aggregator};

    fn limits() -> Limits {
        Limits { value_size_max: 1 << 20, array_size_max: 50 }
    }

    fn run(table: &mut Table, now: u32, wire: &[u8]) -> Vec<u8> {
        let agg = Aggregator::new();
        let mut out = Vec::new();
        match agg.next_command(wire, &limits()) {
            AggOutcome::Command { command, .. } => {
                dispatch(table, &limits(), now, command, &mut out);
            }
            _ => panic!("expected a complete command"),
        }
        out
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut t = Table::new(8);
        assert_eq!(run(&mut t, 0, b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nhello\r\n"), b"+OK\r\n");
        assert_eq!(run(&mut t, 0, b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n"), b"hello\r\n");
    }

    #[test]
    fn get_miss_is_the_negative_bulk_sentinel() {
        let mut t = Table::new(8);
        assert_eq!(run(&mut t, 0, b"*2\r\n$3\r\nGET\r\n$3\r\nnop\r\n"), b"$-1\r\n");
    }

    #[test]
    fn del_on_absent_key_is_a_no_op_ok() {
        let mut t = Table::new(8);
        assert_eq!(run(&mut t, 0, b"*2\r\n$3\r\nDEL\r\n$3\r\nnop\r\n"), b"+OK\r\n");
    }

    #[test]
    fn del_then_get_misses() {
        let mut t = Table::new(8);
        run(&mut t, 0, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
        assert_eq!(run(&mut t, 0, b"*2\r\n$3\r\nDEL\r\n$1\r\nk\r\n"), b"+OK\r\n");
        assert_eq!(run(&mut t, 0, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"), b"$-1\r\n");
    }

    #[test]
    fn set_with_past_absolute_ttl_is_immediately_expired() {
        let mut t = Table::new(8);
        run(&mut t, 100, b"*4\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\n50\r\n");
        assert_eq!(run(&mut t, 100, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"), b"$-1\r\n");
    }

    #[test]
    fn set_with_future_absolute_ttl_expires_at_that_instant() {
        let mut t = Table::new(8);
        run(&mut t, 10, b"*4\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\n11\r\n");
        assert_eq!(run(&mut t, 10, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"), b"v\r\n");
        assert_eq!(run(&mut t, 11, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"), b"$-1\r\n");
    }

    #[test]
    fn expired_command_extends_ttl() {
        let mut t = Table::new(8);
        run(&mut t, 0, b"*4\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$1\r\n5\r\n");
        assert_eq!(run(&mut t, 4, b"*3\r\n$7\r\nEXPIRED\r\n$1\r\nk\r\n$3\r\n100\r\n"), b"+OK\r\n");
        assert_eq!(run(&mut t, 50, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"), b"v\r\n");
    }

    #[test]
    fn expired_on_absent_key_is_a_no_op_ok() {
        let mut t = Table::new(8);
        assert_eq!(run(&mut t, 0, b"*3\r\n$7\r\nEXPIRED\r\n$1\r\nk\r\n$1\r\n5\r\n"), b"+OK\r\n");
    }

    #[test]
    fn unknown_verb_is_rejected() {
        let mut t = Table::new(8);
        assert_eq!(run(&mut t, 0, b"*1\r\n$4\r\nPING\r\n"), b"-ERR UNKNOWN\r\n");
    }

    #[test]
    fn set_with_wrong_arity_is_rejected() {
        let mut t = Table::new(8);
        assert_eq!(run(&mut t, 0, b"*2\r\n$3\r\nSET\r\n$1\r\nk\r\n"), b"-ERR ARITY\r\n");
    }

    #[test]
    fn zero_length_key_is_rejected() {
        let mut t = Table::new(8);
        assert_eq!(run(&mut t, 0, b"*2\r\n$3\r\nGET\r\n$0\r\n\r\n"), b"-ERR KEYLEN\r\n");
    }

    #[test]
    fn set_replace_frees_the_old_value_exactly_once() {
        let mut t = Table::new(8);
        run(&mut t, 0, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\naaaaa\r\n");
        run(&mut t, 0, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$10\r\nbbbbbbbbbb\r\n");
        assert_eq!(run(&mut t, 0, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"), b"bbbbbbbbbb\r\n");
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn authorized_resize_lets_a_full_table_keep_accepting_inserts() {
        let mut t = Table::new(8);
        for i in 0..10u8 {
            let wire = format!("*3\r\n$3\r\nSET\r\n$1\r\n{}\r\n$1\r\nv\r\n", (b'a' + i) as char);
            assert_eq!(run(&mut t, 0, wire.as_bytes()), b"+OK\r\n");
        }
        assert_eq!(t.len(), 10);
        assert!(t.capacity() >= 16);
    }
}
