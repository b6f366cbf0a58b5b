use proptest::prelude::*;
use protocol::{AggOutcome, Aggregator, Limits};

fn limits() -> Limits {
    Limits { value_size_max: 1 << 20, array_size_max: 64 }
}

/// Drives the aggregator over a byte stream that may arrive as several
/// separate chunks, returning the verbs of every command fully assembled.
fn collect_verbs(chunks: &[&[u8]]) -> Vec<Vec<u8>> {
    let mut buf = Vec::new();
    let mut cursor = 0usize;
    let mut verbs = Vec::new();
    let agg = Aggregator::new();

    for chunk in chunks {
        buf.extend_from_slice(chunk);
        loop {
            match agg.next_command(&buf[cursor..], &limits()) {
                AggOutcome::Command { command, consumed } => {
                    verbs.push(command.verb().to_vec());
                    cursor += consumed;
                }
                AggOutcome::NeedMore => break,
                AggOutcome::Error { .. } => panic!("unexpected protocol error"),
            }
        }
    }
    verbs
}

#[test]
fn basic_set_then_get_round_trip() {
    let input: &[u8] = b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nhello\r\n\
                         *2\r\n$3\r\nGET\r\n$3\r\nkey\r\n";
    let verbs = collect_verbs(&[input]);
    assert_eq!(verbs, vec![b"SET".to_vec(), b"GET".to_vec()]);
}

#[test]
fn replace_with_a_longer_value_is_one_command() {
    let input: &[u8] = b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$3\r\nold\r\n\
                         *3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$9\r\nlonger-va\r\n";
    let verbs = collect_verbs(&[input]);
    assert_eq!(verbs, vec![b"SET".to_vec(), b"SET".to_vec()]);
}

#[test]
fn byte_at_a_time_delivery_still_assembles_every_command() {
    let input: &[u8] = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n\
                         *2\r\n$3\r\nDEL\r\n$1\r\nk\r\n";
    let chunks: Vec<&[u8]> = (0..input.len()).map(|i| &input[i..i + 1]).collect();
    let verbs = collect_verbs(&chunks);
    assert_eq!(verbs, vec![b"SET".to_vec(), b"DEL".to_vec()]);
}

proptest! {
    #[test]
    fn arbitrary_split_points_never_lose_or_duplicate_commands(splits in prop::collection::vec(1usize..7, 1..40)) {
        let input: &[u8] = b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\nb\r\n\
                             *2\r\n$3\r\nGET\r\n$1\r\na\r\n\
                             *2\r\n$3\r\nDEL\r\n$1\r\na\r\n";
        let mut chunks = Vec::new();
        let mut pos = 0usize;
        for s in splits {
            if pos >= input.len() {
                break;
            }
            let end = (pos + s).min(input.len());
            chunks.push(&input[pos..end]);
            pos = end;
        }
        if pos < input.len() {
            chunks.push(&input[pos..]);
        }
        let verbs = collect_verbs(&chunks);
        prop_assert_eq!(verbs, vec![b"SET".to_vec(), b"GET".to_vec(), b"DEL".to_vec()]);
    }
}
