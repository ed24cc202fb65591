//! # Timeline Index
//!
//! Maps global book positions onto `(file, local offset)` pairs and chapter
//! indices. Built once per loaded book; all lookups are pure.

use crate::model::{AudioFile, Book, Chapter};

/// Precomputed file offsets and chapter table of one book.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineIndex {
    /// `offsets[i]` is the global start of file `i`.
    offsets: Vec<f64>,
    durations: Vec<f64>,
    chapters: Vec<(f64, f64)>,
    duration: f64,
}

impl TimelineIndex {
    pub fn new(files: &[AudioFile], chapters: &[Chapter], duration: f64) -> Self {
        let mut offsets = Vec::with_capacity(files.len());
        let mut acc = 0.0;
        for file in files {
            offsets.push(acc);
            acc += file.duration;
        }

        Self {
            offsets,
            durations: files.iter().map(|f| f.duration).collect(),
            chapters: chapters.iter().map(|c| (c.start, c.end)).collect(),
            duration,
        }
    }

    pub fn for_book(book: &Book) -> Self {
        Self::new(&book.files, &book.chapters, book.duration)
    }

    pub fn file_count(&self) -> usize {
        self.offsets.len()
    }

    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    /// Book duration in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn file_duration(&self, file_index: usize) -> Option<f64> {
        self.durations.get(file_index).copied()
    }

    /// Sum of the durations of all files before `file_index`.
    ///
    /// Indices past the end yield the total length of all files.
    pub fn file_offset(&self, file_index: usize) -> f64 {
        match self.offsets.get(file_index) {
            Some(offset) => *offset,
            None => self.total_file_length(),
        }
    }

    /// Resolve a global position to `(file index, local offset)`.
    ///
    /// Positions at or past the end of the last file map onto the last file
    /// (`p == total` gives a local offset equal to that file's duration).
    /// Negative positions and empty books map to `(0, 0.0)`.
    pub fn file_from_position(&self, position: f64) -> (usize, f64) {
        if self.offsets.is_empty() || !(position >= 0.0) {
            return (0, 0.0);
        }

        let last = self.offsets.len() - 1;
        if position >= self.total_file_length() {
            return (last, position - self.offsets[last]);
        }

        // Last file starting at or before `position`. Zero-length files share
        // their offset with the next one and are skipped by taking the last.
        let file_index = self
            .offsets
            .partition_point(|offset| *offset <= position)
            .saturating_sub(1);
        (file_index, position - self.offsets[file_index])
    }

    /// Smallest chapter index whose `[start, end)` contains `position`.
    ///
    /// Positions at or past the end of the last chapter resolve to the last
    /// chapter; every other miss resolves to 0.
    pub fn chapter_from_position(&self, position: f64) -> usize {
        if let Some(index) = self
            .chapters
            .iter()
            .position(|(start, end)| *start <= position && position < *end)
        {
            return index;
        }

        match self.chapters.last() {
            Some((_, end)) if position >= *end => self.chapters.len() - 1,
            _ => 0,
        }
    }

    pub fn chapter_start(&self, chapter_index: usize) -> Option<f64> {
        self.chapters.get(chapter_index).map(|(start, _)| *start)
    }

    fn total_file_length(&self) -> f64 {
        match (self.offsets.last(), self.durations.last()) {
            (Some(offset), Some(duration)) => offset + duration,
            _ => 0.0,
        }
    }
}
