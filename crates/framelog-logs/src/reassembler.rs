use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::{Captures, Regex};
use thiserror::Error;

use framelog_types::{Level, LevelError, Record};

/// `LEVEL mmdd hh:mm:ss.uuuuuu thread_id file.ext:line] `
///
/// A header never spans lines. Digit runs are capped so the captured thread
/// id and line number always fit their integer types; longer runs are message
/// text.
static GLOG_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"([A-Z])([0-9]{4})[ \t]+([0-9]{2}:[0-9]{2}:[0-9]{2}\.[0-9]{6})[ \t]+([0-9]{1,19})[ \t]+(\w+\.\w+):([0-9]{1,9})\]\s",
    )
    .expect("glog header pattern is valid")
});

/// Banner glog prints when it cannot open its log file
static GLOG_PERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"C(ould not create log|OULD NOT CREATE LOG).+\n")
        .expect("glog perror pattern is valid")
});

/// Years searched backwards for a Feb 29 header; leap years are at most eight apart
const LEAP_YEAR_SEARCH: i32 = 8;

/// Errors that end a reassembly session
#[derive(Debug, Error)]
pub enum ReassemblyError {
    #[error(transparent)]
    UnknownLevel(#[from] LevelError),

    #[error("invalid timestamp {text:?} in glog header")]
    InvalidTimestamp { text: String },

    #[error("invalid {field} {text:?} in glog header")]
    InvalidField { field: &'static str, text: String },

    #[error("failed to read log source: {0}")]
    Io(#[from] std::io::Error),
}

/// Reassembles arbitrarily chunked glog text into complete records.
///
/// A record stays open until the next header is seen. With `hold_last`
/// enabled (the default, meant for live files) the record belonging to the
/// last header of a chunk is kept back together with the unmatched trailing
/// text, since its message may still be growing. The unfinished last line of
/// that text is re-scanned with the next chunk so a header split across two
/// chunks is still recognized.
#[derive(Debug, Clone)]
pub struct GlogReassembler {
    hold_last: bool,

    /// Year stamped on header timestamps (glog headers carry none)
    year: i32,

    /// Unmatched text after the last header, re-scanned with the next chunk
    pending_text: String,

    /// Start of the last unfinished line of `pending_text`. Complete lines
    /// before it were already scanned and hold no header or banner.
    scan_from: usize,

    /// Record whose message is still open
    pending_record: Option<Record>,
}

impl Default for GlogReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl GlogReassembler {
    /// Create a reassembler that holds the last record of every chunk
    pub fn new() -> Self {
        Self {
            hold_last: true,
            year: Utc::now().year(),
            pending_text: String::new(),
            scan_from: 0,
            pending_record: None,
        }
    }

    pub fn with_hold_last(mut self, hold_last: bool) -> Self {
        self.hold_last = hold_last;
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = year;
        self
    }

    /// Whether a record is currently open
    pub fn has_pending(&self) -> bool {
        self.pending_record.is_some()
    }

    /// Drop all carried state. Idempotent.
    pub fn reset(&mut self) {
        self.pending_text.clear();
        self.scan_from = 0;
        self.pending_record = None;
    }

    /// Feed one chunk and collect the records it closes.
    pub fn parse(&mut self, chunk: &str) -> Result<Vec<Record>, ReassemblyError> {
        let mut records = Vec::new();
        self.feed_into(chunk, &mut records)?;
        Ok(records)
    }

    /// Feed one chunk, pushing every record it closes into `out`.
    ///
    /// Records closed before a malformed header are still pushed when the
    /// error is returned.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<Record>) -> Result<(), ReassemblyError> {
        let mut buffer = std::mem::take(&mut self.pending_text);
        let scan_from = std::mem::take(&mut self.scan_from).min(buffer.len());
        buffer.push_str(chunk);

        let cleaned = match GLOG_PERROR.replace_all(&buffer[scan_from..], "") {
            Cow::Owned(cleaned) => Some(cleaned),
            Cow::Borrowed(_) => None,
        };
        if let Some(cleaned) = cleaned {
            buffer.truncate(scan_from);
            buffer.push_str(&cleaned);
        }

        let mut last_end = 0;
        for caps in GLOG_HEADER.captures_iter(&buffer[scan_from..]) {
            let Some(header) = caps.get(0) else {
                continue;
            };
            self.close_pending(&buffer[last_end..scan_from + header.start()], out);
            self.pending_record = Some(self.make_record(&caps)?);
            last_end = scan_from + header.end();
        }

        if self.hold_last {
            let line_start = buffer[scan_from..]
                .rfind('\n')
                .map_or(scan_from, |i| scan_from + i + 1);
            buffer.drain(..last_end);
            self.scan_from = line_start.max(last_end) - last_end;
            self.pending_text = buffer;
        } else {
            self.close_pending(&buffer[last_end..], out);
            self.reset();
        }
        Ok(())
    }

    /// Close the open record with whatever text is still carried.
    ///
    /// Called at the end of the stream.
    pub fn finish(&mut self) -> Option<Record> {
        let tail = std::mem::take(&mut self.pending_text);
        let tail = GLOG_PERROR.replace_all(&tail, "");
        let record = self.pending_record.take().map(|mut record| {
            record.message.push_str(&tail);
            record
        });
        self.reset();
        record
    }

    /// Reassemble a whole chunk stream lazily. Resets state first.
    pub fn process<I>(mut self, chunks: I) -> Records<I::IntoIter>
    where
        I: IntoIterator<Item = Result<String, std::io::Error>>,
    {
        self.reset();
        Records {
            reassembler: self,
            chunks: chunks.into_iter(),
            ready: VecDeque::new(),
            error: None,
            done: false,
        }
    }

    fn close_pending(&mut self, text: &str, out: &mut Vec<Record>) {
        match self.pending_record.take() {
            Some(mut record) => {
                record.message.push_str(text);
                out.push(record);
            }
            None if !text.is_empty() => {
                tracing::debug!(bytes = text.len(), "dropping text before the first glog header");
            }
            None => {}
        }
    }

    fn make_record(&self, caps: &Captures<'_>) -> Result<Record, ReassemblyError> {
        let level = Level::from_code(&caps[1])?;
        let timestamp = self.parse_timestamp(&caps[2], &caps[3])?;
        let thread_id = caps[4].parse().map_err(|_| ReassemblyError::InvalidField {
            field: "thread id",
            text: caps[4].to_string(),
        })?;
        let source_line = caps[6].parse().map_err(|_| ReassemblyError::InvalidField {
            field: "line number",
            text: caps[6].to_string(),
        })?;

        Ok(Record {
            level,
            timestamp,
            thread_id,
            source_file: caps[5].to_string(),
            source_line,
            message: String::new(),
        })
    }

    fn parse_timestamp(&self, month_day: &str, time: &str) -> Result<NaiveDateTime, ReassemblyError> {
        let invalid = || ReassemblyError::InvalidTimestamp {
            text: format!("{} {}", month_day, time),
        };

        // Both fields are ASCII digits, guaranteed by the header pattern
        let month: u32 = month_day[..2].parse().map_err(|_| invalid())?;
        let day: u32 = month_day[2..].parse().map_err(|_| invalid())?;
        // Feb 29 in a non-leap stamped year belongs to the closest earlier leap year
        let date = (0..=LEAP_YEAR_SEARCH)
            .find_map(|back| NaiveDate::from_ymd_opt(self.year - back, month, day))
            .ok_or_else(invalid)?;
        let time = NaiveTime::parse_from_str(time, "%H:%M:%S%.f").map_err(|_| invalid())?;
        Ok(date.and_time(time))
    }
}

/// Lazy record sequence over a chunk stream, see [`GlogReassembler::process`].
///
/// The open record is flushed when the chunk stream ends. The first error
/// ends the sequence.
pub struct Records<I> {
    reassembler: GlogReassembler,
    chunks: I,
    ready: VecDeque<Record>,
    error: Option<ReassemblyError>,
    done: bool,
}

impl<I> Records<I> {
    /// Drop carried state and any records not yet pulled
    pub fn reset(&mut self) {
        self.reassembler.reset();
        self.ready.clear();
    }
}

impl<I> Iterator for Records<I>
where
    I: Iterator<Item = Result<String, std::io::Error>>,
{
    type Item = Result<Record, ReassemblyError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Some(Ok(record));
            }
            if let Some(error) = self.error.take() {
                return Some(Err(error));
            }
            if self.done {
                return None;
            }

            match self.chunks.next() {
                Some(Ok(chunk)) => {
                    let mut closed = Vec::new();
                    let result = self.reassembler.feed_into(&chunk, &mut closed);
                    self.ready.extend(closed);
                    if let Err(error) = result {
                        self.error = Some(error);
                        self.done = true;
                    }
                }
                Some(Err(error)) => {
                    self.error = Some(error.into());
                    self.done = true;
                }
                None => {
                    self.ready.extend(self.reassembler.finish());
                    self.done = true;
                }
            }
        }
    }
}

/// Project a record stream onto its message bodies
pub fn messages<I, E>(records: I) -> impl Iterator<Item = Result<String, E>>
where
    I: IntoIterator<Item = Result<Record, E>>,
{
    records
        .into_iter()
        .map(|record| record.map(|record| record.message))
}
