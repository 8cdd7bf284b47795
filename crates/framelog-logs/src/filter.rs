use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;

use framelog_types::{Level, LevelError, Record};

/// Errors from building a record filter
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("unknown filter {0:?} (expected level, thread or filename)")]
    UnknownFilter(String),

    #[error("filter {0:?} needs a parameter")]
    MissingParam(String),

    #[error(transparent)]
    Level(#[from] LevelError),

    #[error("invalid thread id {0:?}")]
    Thread(String),

    #[error("invalid filename pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Stateless predicate over records.
///
/// Each configured constraint must hold for a record to pass; an empty set
/// means the constraint is not applied.
#[derive(Clone, Default)]
pub struct RecordFilter {
    /// Levels to include (empty = all)
    levels: HashSet<Level>,

    /// Thread ids to include (empty = all)
    threads: HashSet<u64>,

    /// Full-match filename pattern
    filename: Option<Regex>,

    /// Original filename pattern string
    filename_pattern: String,
}

impl RecordFilter {
    /// Create a filter that passes everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep records at `min_level` or more severe
    pub fn min_level(min_level: Level) -> Self {
        Self::new().with_min_level(min_level)
    }

    /// Replace the level constraint with `min_level` and everything above it
    pub fn with_min_level(self, min_level: Level) -> Self {
        let levels = [Level::Info, Level::Warning, Level::Error, Level::Fatal]
            .into_iter()
            .filter(|level| *level >= min_level)
            .collect();
        self.with_levels(levels)
    }

    /// Set log levels to filter by
    pub fn with_levels(mut self, levels: HashSet<Level>) -> Self {
        self.levels = levels;
        self
    }

    /// Set thread ids to filter by
    pub fn with_threads(mut self, threads: HashSet<u64>) -> Self {
        self.threads = threads;
        self
    }

    /// Set a filename pattern; it must match the whole file name
    pub fn with_filename(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.filename = Some(Regex::new(&format!("^(?:{})$", pattern))?);
        self.filename_pattern = pattern.to_string();
        Ok(self)
    }

    /// Add a constraint from a `name=param[,param...]` spec.
    ///
    /// `level=W,E`, `thread=123,124` and `filename=app_.*\.cc` are accepted.
    /// Specs for the same name replace each other.
    pub fn add_spec(self, spec: &str) -> Result<Self, FilterError> {
        let (name, params) = spec.split_once('=').unwrap_or((spec, ""));
        let name = name.trim();
        let params = params.trim();
        if params.is_empty() {
            return Err(FilterError::MissingParam(name.to_string()));
        }

        match name {
            "level" => {
                let levels = params
                    .split(',')
                    .map(|code| code.parse::<Level>())
                    .collect::<Result<HashSet<Level>, _>>()?;
                Ok(self.with_levels(levels))
            }
            "thread" => {
                let threads = params
                    .split(',')
                    .map(|t| {
                        t.trim()
                            .parse::<u64>()
                            .map_err(|_| FilterError::Thread(t.to_string()))
                    })
                    .collect::<Result<HashSet<u64>, _>>()?;
                Ok(self.with_threads(threads))
            }
            "filename" => Ok(self.with_filename(params)?),
            other => Err(FilterError::UnknownFilter(other.to_string())),
        }
    }

    /// Build a filter from several specs
    pub fn from_specs<S: AsRef<str>>(specs: &[S]) -> Result<Self, FilterError> {
        specs
            .iter()
            .try_fold(Self::new(), |filter, spec| filter.add_spec(spec.as_ref()))
    }

    /// Check if a record passes this filter
    pub fn matches(&self, record: &Record) -> bool {
        if !self.levels.is_empty() && !self.levels.contains(&record.level) {
            return false;
        }

        if !self.threads.is_empty() && !self.threads.contains(&record.thread_id) {
            return false;
        }

        match &self.filename {
            Some(re) => re.is_match(&record.source_file),
            None => true,
        }
    }

    /// Apply this filter to a record stream; errors pass through untouched
    pub fn apply<I, E>(self, records: I) -> impl Iterator<Item = Result<Record, E>>
    where
        I: IntoIterator<Item = Result<Record, E>>,
    {
        records.into_iter().filter(move |record| match record {
            Ok(record) => self.matches(record),
            Err(_) => true,
        })
    }

    /// Check if filter is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty() && self.threads.is_empty() && self.filename.is_none()
    }
}

impl std::fmt::Debug for RecordFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordFilter")
            .field("levels", &self.levels)
            .field("threads", &self.threads)
            .field("filename", &self.filename_pattern)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(level: Level, thread_id: u64, source_file: &str) -> Record {
        Record {
            level,
            timestamp: NaiveDate::from_ymd_opt(2019, 9, 20)
                .unwrap()
                .and_hms_opt(10, 42, 2)
                .unwrap(),
            thread_id,
            source_file: source_file.to_string(),
            source_line: 1,
            message: "msg\n".to_string(),
        }
    }

    #[test]
    fn test_empty_filter_passes_everything() {
        let filter = RecordFilter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&record(Level::Fatal, 1, "a.cc")));
    }

    #[test]
    fn test_level_filter() {
        let filter = RecordFilter::new().add_spec("level=W,E").unwrap();
        assert!(filter.matches(&record(Level::Warning, 1, "a.cc")));
        assert!(filter.matches(&record(Level::Error, 1, "a.cc")));
        assert!(!filter.matches(&record(Level::Info, 1, "a.cc")));
    }

    #[test]
    fn test_min_level() {
        let filter = RecordFilter::min_level(Level::Error);
        assert!(!filter.matches(&record(Level::Warning, 1, "a.cc")));
        assert!(filter.matches(&record(Level::Fatal, 1, "a.cc")));

        let filter = RecordFilter::new()
            .add_spec("thread=7")
            .unwrap()
            .with_min_level(Level::Warning);
        assert!(filter.matches(&record(Level::Warning, 7, "a.cc")));
        assert!(!filter.matches(&record(Level::Warning, 8, "a.cc")));
        assert!(!filter.matches(&record(Level::Info, 7, "a.cc")));
    }

    #[test]
    fn test_thread_and_filename_filters() {
        let filter = RecordFilter::from_specs(&["thread=7,8", r"filename=app_\w+\.cc"]).unwrap();
        assert!(filter.matches(&record(Level::Info, 7, "app_main.cc")));
        assert!(!filter.matches(&record(Level::Info, 9, "app_main.cc")));
        // full match only
        assert!(!filter.matches(&record(Level::Info, 7, "app_main.cc.bak")));
        assert!(!filter.matches(&record(Level::Info, 7, "my_app_main.cc")));
    }

    #[test]
    fn test_bad_specs() {
        assert!(matches!(
            RecordFilter::new().add_spec("color=red"),
            Err(FilterError::UnknownFilter(_))
        ));
        assert!(matches!(
            RecordFilter::new().add_spec("level"),
            Err(FilterError::MissingParam(_))
        ));
        assert!(matches!(
            RecordFilter::new().add_spec("level=D"),
            Err(FilterError::Level(_))
        ));
        assert!(matches!(
            RecordFilter::new().add_spec("thread=main"),
            Err(FilterError::Thread(_))
        ));
        assert!(matches!(
            RecordFilter::new().add_spec("filename=("),
            Err(FilterError::Pattern(_))
        ));
    }

    #[test]
    fn test_apply_keeps_errors() {
        let stream: Vec<Result<Record, String>> = vec![
            Ok(record(Level::Info, 1, "a.cc")),
            Ok(record(Level::Error, 1, "a.cc")),
            Err("boom".to_string()),
        ];
        let kept: Vec<_> = RecordFilter::min_level(Level::Warning).apply(stream).collect();
        assert_eq!(kept.len(), 2);
        assert!(kept[1].is_err());
    }
}
