//! ASCII hprof report
//!
//! Renders [`HprofData`] in the classic hprof text layout:
//!
//! ```text
//! THREAD START (obj=1, id = 200001, name="main", group="main")
//! TRACE 300001: (thread=200001)
//!     java.lang.Object.wait(Native Method)
//! CPU SAMPLES BEGIN (total = 826) Wed Jul 21 12:03:46 2010
//! rank   self  accum   count trace method
//!    1 65.62% 65.62%     542  300001 java.lang.Object.wait
//! CPU SAMPLES END
//! ```
//!
//! Traces are listed by descending count. The total is the same one the
//! binary writer puts in CPU_SAMPLES.

// Percentages intentionally convert counts to f64
#![allow(clippy::cast_precision_loss)]

use std::fmt::Display;
use std::io::Write;

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};

use crate::model::{HprofData, Sample};

/// Plain-text writer for one [`HprofData`]
pub struct AsciiHprofWriter;

impl AsciiHprofWriter {
    /// Write the report to any writer (file, stdout, buffer, etc.)
    ///
    /// # Errors
    /// Returns an error if the sample total overflows or the output fails
    pub fn write<W: Write>(data: &HprofData, mut out: W) -> Result<()> {
        let total = data.total_samples().context("Failed to total samples")?;

        for event in data.thread_history() {
            writeln!(out, "{event}")?;
        }

        let mut samples = data.samples();
        // Stable: ties keep snapshot order
        samples.sort_by_key(|sample| std::cmp::Reverse(sample.count));

        for sample in &samples {
            let trace = sample.stack_trace;
            writeln!(out, "TRACE {}: (thread={})", trace.stack_trace_id, trace.thread_id())?;
            for frame in trace.frames() {
                writeln!(out, "\t{frame}")?;
            }
        }

        writeln!(out, "CPU SAMPLES BEGIN (total = {total}) {}", format_date(data.start_millis()))?;
        writeln!(out, "rank   self  accum   count trace method")?;
        let mut accum = 0.0;
        for (index, sample) in samples.iter().enumerate() {
            let self_ratio = f64::from(sample.count) / f64::from(total);
            accum += self_ratio;
            writeln!(out, "{}", format_row(index + 1, self_ratio, accum, sample))?;
        }
        writeln!(out, "CPU SAMPLES END")?;

        out.flush().context("Failed to flush ascii report")?;
        Ok(())
    }
}

/// `rank self% accum% count trace [class.method]`
fn format_row(rank: usize, self_ratio: f64, accum: f64, sample: &Sample<'_>) -> String {
    let trace = sample.stack_trace;
    let mut row = format!(
        "{}{}%{}% {} {}",
        signed_field(rank, 4),
        signed_field(format!("{:.2}", self_ratio * 100.0), 6),
        signed_field(format!("{:.2}", accum * 100.0), 6),
        signed_field(sample.count, 7),
        signed_field(trace.stack_trace_id, 5),
    );
    if let Some(frame) = trace.top_frame() {
        row.push_str(&format!(" {}.{}", frame.class_name, frame.method_name));
    }
    row
}

/// Non-negative value with a leading sign space, right-aligned to `width`
fn signed_field(value: impl Display, width: usize) -> String {
    format!("{:>width$}", format!(" {value}"))
}

/// Local-time date like `Wed Jul 21 12:03:46 2010`
fn format_date(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .earliest()
        .map_or_else(|| millis.to_string(), |date| date.format("%a %b %d %H:%M:%S %Y").to_string())
}
