use std::env::{self, VarError};
use std::fs::OpenOptions;
use std::io::{self, Read};

use bytes::Bytes;
use zlmb_frame::decode_str;
use zlmb_worker::{FRAME_LENGTH_VAR, FRAME_VAR, LENGTH_VAR};

use crate::cmd::InspectArgs;
use crate::exit::{frame_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{write_frames, OutputFormat};

pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let frame_count: usize = parse_var(&args.env_prefix, FRAME_VAR)?;
    let manifest = read_var(&args.env_prefix, FRAME_LENGTH_VAR)?;
    let length: usize = parse_var(&args.env_prefix, LENGTH_VAR)?;

    let mut buffer = Vec::with_capacity(length);
    io::stdin()
        .lock()
        .read_to_end(&mut buffer)
        .map_err(|err| io_error("failed reading stdin", err))?;

    let frames = check_envelope(frame_count, &manifest, length, Bytes::from(buffer))?;

    let written = match &args.output {
        Some(path) => {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?;
            write_frames(&mut file, &manifest, &frames, format)
        }
        None => write_frames(&mut io::stdout().lock(), &manifest, &frames, format),
    };
    written.map_err(|err| io_error("failed writing output", err))?;

    Ok(SUCCESS)
}

fn check_envelope(
    frame_count: usize,
    manifest: &str,
    length: usize,
    buffer: Bytes,
) -> CliResult<Vec<Bytes>> {
    if buffer.len() != length {
        return Err(CliError::new(
            DATA_INVALID,
            format!(
                "{LENGTH_VAR} declares {length} bytes but stdin carried {}",
                buffer.len()
            ),
        ));
    }
    let frames = decode_str(manifest, &buffer).map_err(|err| frame_error("decode failed", err))?;
    if frames.len() != frame_count {
        return Err(CliError::new(
            DATA_INVALID,
            format!(
                "{FRAME_VAR} declares {frame_count} frames but the manifest lists {}",
                frames.len()
            ),
        ));
    }
    Ok(frames)
}

fn read_var(prefix: &str, name: &str) -> CliResult<String> {
    let key = format!("{prefix}{name}");
    env::var(&key).map_err(|err| match err {
        VarError::NotPresent => CliError::new(
            USAGE,
            format!("{key} is not set; inspect runs as a worker handler"),
        ),
        VarError::NotUnicode(_) => CliError::new(DATA_INVALID, format!("{key} is not valid UTF-8")),
    })
}

fn parse_var(prefix: &str, name: &str) -> CliResult<usize> {
    let value = read_var(prefix, name)?;
    parse_count(&format!("{prefix}{name}"), &value)
}

/// Parse a count exactly as written: no sign, whitespace or empty value.
fn parse_count(key: &str, value: &str) -> CliResult<usize> {
    let digits_only = !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit());
    match value.parse() {
        Ok(count) if digits_only => Ok(count),
        _ => Err(CliError::new(
            DATA_INVALID,
            format!("{key} is not a byte or frame count: '{value}'"),
        )),
    }
}
