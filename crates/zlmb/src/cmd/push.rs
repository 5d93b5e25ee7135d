use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::num::NonZeroUsize;
use std::path::Path;

use serde::Serialize;
use tracing::debug;
use zlmb_frame::Message;
use zlmb_queue::{EnvelopeTransport, QueueSocket, Role};

use crate::cmd::{parse_endpoint, PushArgs};
use crate::exit::{io_error, queue_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_stats, OutputFormat};

#[derive(Debug, Default, Serialize)]
struct PushReport {
    messages: u64,
    frames: u64,
    bytes: u64,
}

pub fn run(args: PushArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = parse_endpoint(&args.endpoint)?;
    let messages = match &args.file {
        Some(path) => read_messages(path, args.multipart)?,
        None => vec![Message::from_frames(args.messages.iter().cloned())],
    };

    let mut socket = QueueSocket::connect(&endpoint, Role::Push)
        .map_err(|err| queue_error("connect failed", err))?;

    let mut report = PushReport::default();
    for message in &messages {
        socket
            .send(message)
            .map_err(|err| queue_error("send failed", err))?;
        report.messages += 1;
        report.frames += message.len() as u64;
        report.bytes += message.byte_len() as u64;
    }
    socket
        .close()
        .map_err(|err| queue_error("close failed", err))?;
    debug!(endpoint = %endpoint, messages = report.messages, "push complete");

    print_stats("push", &report, format);
    Ok(SUCCESS)
}

fn read_messages(path: &Path, multipart: Option<NonZeroUsize>) -> CliResult<Vec<Message>> {
    let read = if path == Path::new("-") {
        read_lines(io::stdin().lock())
    } else {
        let file = File::open(path)
            .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?;
        read_lines(BufReader::new(file))
    };
    let lines = read.map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;

    group_lines(lines, multipart)
}

/// Split input on `\n`, dropping a trailing `\r` from each line.
fn read_lines<R: BufRead>(reader: R) -> io::Result<Vec<Vec<u8>>> {
    reader
        .split(b'\n')
        .map(|line| {
            line.map(|mut line| {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                line
            })
        })
        .collect()
}

fn group_lines(lines: Vec<Vec<u8>>, multipart: Option<NonZeroUsize>) -> CliResult<Vec<Message>> {
    if lines.is_empty() {
        return Err(CliError::new(DATA_INVALID, "input contained no frames"));
    }
    let messages = match multipart {
        Some(size) => lines
            .chunks(size.get())
            .map(|chunk| Message::from_frames(chunk.iter().cloned()))
            .collect(),
        None => vec![Message::from_frames(lines)],
    };
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_keep_empty_frames_and_strip_carriage_returns() {
        let lines = read_lines(&b"one\r\n\ntwo"[..]).unwrap();
        assert_eq!(lines, [b"one".to_vec(), Vec::new(), b"two".to_vec()]);
    }

    #[test]
    fn whole_input_is_one_message_by_default() {
        let lines = read_lines(&b"a\nb\nc\n"[..]).unwrap();
        let messages = group_lines(lines, None).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].len(), 3);
    }

    #[test]
    fn multipart_groups_lines() {
        let lines = read_lines(&b"a\nb\nc\nd\ne\n"[..]).unwrap();
        let messages = group_lines(lines, NonZeroUsize::new(2)).unwrap();
        let sizes: Vec<usize> = messages.iter().map(Message::len).collect();
        assert_eq!(sizes, [2, 2, 1]);
    }

    #[test]
    fn empty_input_is_rejected() {
        let err = group_lines(Vec::new(), None).unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
    }
}
