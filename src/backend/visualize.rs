use std::fs::{File, OpenOptions};
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use crate::error::Result;
use crate::state::{Device, Event, State};

static INDEX_HTML_CONTENT: &str = include_str!("../../timeline_files/index.html");
static TIMELINE_JS_CONTENT: &str = include_str!("../../timeline_files/timeline.js");
static TIMELINE_CSS_CONTENT: &str = include_str!("../../timeline_files/timeline.css");

pub const TITLE: &str = "TensorFlow Timeline";

// Pixels per row, plus room for the axis and padding.
const ROW_HEIGHT: u32 = 20;
const CHART_PADDING: u32 = 60;

#[derive(Serialize, Clone)]
struct EventRecord<'a> {
    name: &'a str,
    op: &'a str,
    inputs: String,
    description: &'a str,
    // Milliseconds.
    duration: f64,
    start: f64,
    end: f64,
    row: u32,
    y: f64,
    color: String,
}

impl<'a> EventRecord<'a> {
    fn new(event: &'a Event) -> Self {
        EventRecord {
            name: &event.name,
            op: &event.op,
            inputs: event.inputs.join("\n\n"),
            description: &event.label,
            duration: event.duration.to_ms(),
            start: event.start.to_ms(),
            end: event.end.to_ms(),
            row: event.row,
            y: event.row as f64 + 0.5,
            color: event.color.to_string(),
        }
    }
}

#[derive(Serialize, Clone)]
struct DeviceRecord<'a> {
    name: &'a str,
    rows: u32,
    height: u32,
    events: Vec<EventRecord<'a>>,
}

/// Rows shown for a device: an empty device still gets one blank row, and a
/// single row is padded so the bars don't fill the whole chart.
pub fn display_rows(num_rows: u32) -> u32 {
    match num_rows {
        0 => 1,
        1 => 2,
        n => n,
    }
}

pub fn chart_height(num_rows: u32) -> u32 {
    ROW_HEIGHT * display_rows(num_rows) + CHART_PADDING
}

impl<'a> DeviceRecord<'a> {
    fn new(device: &'a Device) -> Self {
        DeviceRecord {
            name: &device.name,
            rows: display_rows(device.num_rows),
            height: chart_height(device.num_rows),
            events: device.events.iter().map(EventRecord::new).collect(),
        }
    }
}

#[derive(Serialize, Clone)]
struct TimelineRecord<'a> {
    title: &'a str,
    max_x: f64,
    devices: Vec<DeviceRecord<'a>>,
}

fn timeline_json(state: &State) -> Result<String> {
    let record = TimelineRecord {
        title: TITLE,
        max_x: state.max_time().to_ms(),
        devices: state.devices.iter().map(DeviceRecord::new).collect(),
    };
    // The JSON sits inside a <script> element, which must not see "</".
    Ok(serde_json::to_string(&record)?.replace("</", "<\\/"))
}

/// Renders the whole timeline as one self-contained HTML document.
pub fn render_timeline(state: &State) -> Result<String> {
    let data = timeline_json(state)?;
    // Data goes in last so nothing inside it is taken for a placeholder.
    Ok(INDEX_HTML_CONTENT
        .replace("{TITLE}", TITLE)
        .replace("{STYLE}", TIMELINE_CSS_CONTENT)
        .replace("{SCRIPT}", TIMELINE_JS_CONTENT)
        .replace("{DATA}", &data))
}

/// Opens `path` for writing. Unless `force` is set an existing file is kept
/// and the first free `<stem>.<i>.<ext>` sibling is used instead.
pub fn create_unique_file<P: AsRef<Path>>(path: P, force: bool) -> io::Result<(PathBuf, File)> {
    let path = path.as_ref().to_owned();
    if force {
        let file = File::create(&path)?;
        return Ok((path, file));
    }
    let mut i = 0;
    let retry_limit = 100;
    loop {
        let p = if i == 0 {
            path.clone()
        } else {
            let stem = path.file_stem().unwrap_or_default().to_string_lossy();
            let name = match path.extension() {
                Some(ext) => format!("{}.{}.{}", stem, i, ext.to_string_lossy()),
                None => format!("{}.{}", stem, i),
            };
            path.with_file_name(name)
        };
        match OpenOptions::new().write(true).create_new(true).open(&p) {
            Ok(file) => return Ok((p, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && i < retry_limit => i += 1,
            // tried too many times, assume this is a permanent failure
            Err(e) => return Err(e),
        }
    }
}

/// Writes the timeline to `path` and returns the path actually written.
pub fn emit_timeline<P: AsRef<Path>>(state: &State, path: P, force: bool) -> Result<PathBuf> {
    let html = render_timeline(state)?;
    let (path, mut file) = create_unique_file(path, force)?;
    info!("Generating timeline {:?}", &path);
    file.write_all(html.as_bytes())?;
    Ok(path)
}
