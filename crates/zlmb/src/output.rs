use std::io::{self, IsTerminal, Write};

use bytes::Bytes;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput {
    index: usize,
    length: usize,
    data: String,
}

#[derive(Serialize)]
struct EnvelopeOutput<'a> {
    frame_count: usize,
    manifest: &'a str,
    length: usize,
    frames: Vec<FrameOutput>,
}

/// Write decoded frames in the requested format.
pub fn write_frames<W: Write>(
    out: &mut W,
    manifest: &str,
    frames: &[Bytes],
    format: OutputFormat,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => {
            let envelope = EnvelopeOutput {
                frame_count: frames.len(),
                manifest,
                length: frames.iter().map(Bytes::len).sum(),
                frames: frames
                    .iter()
                    .enumerate()
                    .map(|(index, frame)| FrameOutput {
                        index,
                        length: frame.len(),
                        data: payload_preview(frame),
                    })
                    .collect(),
            };
            serde_json::to_writer(&mut *out, &envelope).map_err(io::Error::from)?;
            writeln!(out)?;
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FRAME", "LENGTH", "DATA"]);
            for (index, frame) in frames.iter().enumerate() {
                table.add_row(vec![
                    index.to_string(),
                    frame.len().to_string(),
                    payload_preview(frame),
                ]);
            }
            writeln!(out, "{table}")?;
        }
        OutputFormat::Pretty => {
            writeln!(out, "frames: {}", frames.len())?;
            for (index, frame) in frames.iter().enumerate() {
                writeln!(out, "frame[{index}] length: {}", frame.len())?;
                out.write_all(frame)?;
                writeln!(out)?;
            }
        }
        OutputFormat::Raw => {
            for frame in frames {
                out.write_all(frame)?;
                writeln!(out)?;
            }
        }
    }
    out.flush()
}

/// Print a flat counters struct (`WorkerStats`, `BrokerStats`, ...) to stdout.
pub fn print_stats<T: Serialize>(label: &str, stats: &T, format: OutputFormat) {
    let fields = match serde_json::to_value(stats) {
        Ok(serde_json::Value::Object(fields)) => fields,
        _ => serde_json::Map::new(),
    };

    match format {
        OutputFormat::Json => {
            let mut object = serde_json::Map::new();
            object.insert(label.to_string(), serde_json::Value::Object(fields));
            println!("{}", serde_json::Value::Object(object));
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![label.to_uppercase(), "VALUE".to_string()]);
            for (name, value) in &fields {
                table.add_row(vec![name.clone(), value.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            let line = fields
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("{label}: {line}");
        }
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}
