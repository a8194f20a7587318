//! Streaming binary hprof writer
//!
//! Output order:
//!
//! 1. header
//! 2. CONTROL_SETTINGS
//! 3. START_THREAD / END_THREAD in history order
//! 4. per sample: the STRING / LOAD_CLASS / STACK_FRAME records it still
//!    needs, then its STACK_TRACE
//! 5. one trailing CPU_SAMPLES record (omitted when there are no samples)
//!
//! Interning tables restart with every call to `write`, so each stream is
//! self-contained.

use std::collections::HashMap;
use std::io::{self, Write};

use log::debug;

use super::{Tag, ID_SIZE, MAGIC, VERSION};
use crate::domain::{HprofError, IdCounter, ProfileError};
use crate::model::{HprofData, Sample, StackFrame, StackTrace, ThreadEvent};

/// Writes one [`HprofData`] as binary hprof.
///
/// The writer borrows the output for its lifetime and flushes it at the end
/// of [`write`](Self::write); it never closes it.
pub struct BinaryHprofWriter<W: Write> {
    out: W,
    string_ids: HashMap<String, u32>,
    class_ids: HashMap<String, u32>,
    frame_ids: HashMap<StackFrame, u32>,
    next_string_id: IdCounter,
    next_class_id: IdCounter,
    next_frame_id: IdCounter,
}

impl<W: Write> BinaryHprofWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            string_ids: HashMap::new(),
            class_ids: HashMap::new(),
            frame_ids: HashMap::new(),
            next_string_id: IdCounter::starting_at(1),
            next_class_id: IdCounter::starting_at(1),
            next_frame_id: IdCounter::starting_at(1),
        }
    }

    fn reset_interning(&mut self) {
        self.string_ids.clear();
        self.class_ids.clear();
        self.frame_ids.clear();
        self.next_string_id = IdCounter::starting_at(1);
        self.next_class_id = IdCounter::starting_at(1);
        self.next_frame_id = IdCounter::starting_at(1);
    }

    /// Encode `data` to the output.
    ///
    /// Configuration problems (depth beyond 16 bits, sample total beyond
    /// 32 bits) are reported before any byte is written.
    ///
    /// # Errors
    /// [`HprofError::Profile`] for configuration problems, [`HprofError::Io`]
    /// if the output fails.
    pub fn write(&mut self, data: &HprofData) -> Result<(), HprofError> {
        let depth = checked_depth(data.depth())?;
        let total = data.total_samples()?;
        let samples = data.samples();
        self.reset_interning();

        let result = self.write_all_records(data, depth, total, &samples);
        self.out.flush()?;
        result?;

        debug!(
            "wrote {} strings, {} classes, {} frames, {} stack traces ({} samples)",
            self.string_ids.len(),
            self.class_ids.len(),
            self.frame_ids.len(),
            samples.len(),
            total
        );
        Ok(())
    }

    /// Give back the output stream
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_all_records(
        &mut self,
        data: &HprofData,
        depth: i16,
        total: u32,
        samples: &[Sample<'_>],
    ) -> Result<(), HprofError> {
        self.write_header(data.start_millis())?;
        self.write_control_settings(data.flags(), depth)?;
        for event in data.thread_history() {
            self.write_thread_event(event)?;
        }
        for sample in samples {
            self.write_stack_trace(sample.stack_trace)?;
        }
        self.write_cpu_samples(total, samples)
    }

    fn write_header(&mut self, start_millis: i64) -> io::Result<()> {
        self.out.write_all(MAGIC.as_bytes())?;
        self.out.write_all(VERSION.as_bytes())?;
        self.out.write_all(&[0])?;
        self.write_u32(ID_SIZE)?;
        self.out.write_all(&start_millis.to_be_bytes())
    }

    fn write_control_settings(&mut self, flags: u32, depth: i16) -> io::Result<()> {
        self.write_record_header(Tag::ControlSettings, Tag::ControlSettings.base_length())?;
        self.write_u32(flags)?;
        self.out.write_all(&depth.to_be_bytes())
    }

    fn write_thread_event(&mut self, event: &ThreadEvent) -> Result<(), HprofError> {
        match event {
            ThreadEvent::Start { object_id, thread_id, thread_name, group_name, parent_group_name } => {
                let thread_name_id = self.write_string(thread_name.as_deref())?;
                let group_name_id = self.write_string(group_name.as_deref())?;
                let parent_group_name_id = self.write_string(parent_group_name.as_deref())?;
                self.write_record_header(Tag::StartThread, Tag::StartThread.base_length())?;
                self.write_u32(thread_id.0)?;
                self.write_id(object_id.0)?;
                // stack trace serial number, not tracked
                self.write_u32(0)?;
                self.write_id(thread_name_id)?;
                self.write_id(group_name_id)?;
                self.write_id(parent_group_name_id)?;
            }
            ThreadEvent::End { thread_id } => {
                self.write_record_header(Tag::EndThread, Tag::EndThread.base_length())?;
                self.write_u32(thread_id.0)?;
            }
        }
        Ok(())
    }

    /// Intern a string, emitting STRING_IN_UTF8 on first use. `None` is id 0.
    fn write_string(&mut self, string: Option<&str>) -> Result<u32, HprofError> {
        let Some(string) = string else {
            return Ok(0);
        };
        if let Some(&id) = self.string_ids.get(string) {
            return Ok(id);
        }
        let id = self.next_string_id.next_id();
        self.string_ids.insert(string.to_string(), id);

        let bytes = string.as_bytes();
        self.write_record_header(Tag::StringInUtf8, record_length(ID_SIZE, bytes.len(), 1)?)?;
        self.write_id(id)?;
        self.out.write_all(bytes)?;
        Ok(id)
    }

    /// Intern a class name, emitting LOAD_CLASS (and its name string) on first use
    fn write_load_class(&mut self, class_name: &str) -> Result<u32, HprofError> {
        if let Some(&id) = self.class_ids.get(class_name) {
            return Ok(id);
        }
        let id = self.next_class_id.next_id();
        self.class_ids.insert(class_name.to_string(), id);

        let class_name_id = self.write_string(Some(class_name))?;
        self.write_record_header(Tag::LoadClass, Tag::LoadClass.base_length())?;
        self.write_u32(id)?;
        // class object id and stack trace serial number, not tracked
        self.write_id(0)?;
        self.write_u32(0)?;
        self.write_id(class_name_id)?;
        Ok(id)
    }

    fn write_stack_frame(&mut self, frame: &StackFrame) -> Result<u32, HprofError> {
        if let Some(&id) = self.frame_ids.get(frame) {
            return Ok(id);
        }
        let id = self.next_frame_id.next_id();
        self.frame_ids.insert(frame.clone(), id);

        let class_id = self.write_load_class(&frame.class_name)?;
        let method_name_id = self.write_string(Some(&frame.method_name))?;
        let source_file_id = self.write_string(frame.file_name.as_deref())?;
        self.write_record_header(Tag::StackFrame, Tag::StackFrame.base_length())?;
        self.write_id(id)?;
        self.write_id(method_name_id)?;
        // method signature, not captured
        self.write_id(0)?;
        self.write_id(source_file_id)?;
        self.write_u32(class_id)?;
        self.out.write_all(&frame.line_number.to_be_bytes())?;
        Ok(id)
    }

    fn write_stack_trace(&mut self, stack_trace: &StackTrace) -> Result<(), HprofError> {
        let frame_ids = stack_trace
            .frames()
            .iter()
            .map(|frame| self.write_stack_frame(frame))
            .collect::<Result<Vec<_>, _>>()?;
        let frame_count = u32::try_from(frame_ids.len()).map_err(|_| too_large(Tag::StackTrace))?;

        let length = record_length(Tag::StackTrace.base_length(), frame_ids.len(), ID_SIZE)?;
        self.write_record_header(Tag::StackTrace, length)?;
        self.write_u32(stack_trace.stack_trace_id.0)?;
        self.write_u32(stack_trace.thread_id().0)?;
        self.write_u32(frame_count)?;
        for frame_id in frame_ids {
            self.write_id(frame_id)?;
        }
        Ok(())
    }

    fn write_cpu_samples(&mut self, total: u32, samples: &[Sample<'_>]) -> Result<(), HprofError> {
        if samples.is_empty() {
            return Ok(());
        }
        let trace_count = u32::try_from(samples.len()).map_err(|_| too_large(Tag::CpuSamples))?;

        let length = record_length(Tag::CpuSamples.base_length(), samples.len(), 4 + 4)?;
        self.write_record_header(Tag::CpuSamples, length)?;
        self.write_u32(total)?;
        self.write_u32(trace_count)?;
        for sample in samples {
            self.write_u32(sample.count)?;
            self.write_u32(sample.stack_trace.stack_trace_id.0)?;
        }
        Ok(())
    }

    fn write_record_header(&mut self, tag: Tag, length: u32) -> io::Result<()> {
        debug_assert!(tag.check_size(length).is_ok(), "{tag} record of length {length}");
        self.out.write_all(&[tag as u8])?;
        // time delta in microseconds, not tracked
        self.write_u32(0)?;
        self.write_u32(length)
    }

    fn write_id(&mut self, id: u32) -> io::Result<()> {
        self.write_u32(id)
    }

    fn write_u32(&mut self, value: u32) -> io::Result<()> {
        self.out.write_all(&value.to_be_bytes())
    }
}

/// Depth as stored in CONTROL_SETTINGS
fn checked_depth(depth: u32) -> Result<i16, ProfileError> {
    i16::try_from(depth).map_err(|_| ProfileError::DepthTooLarge(depth))
}

/// `base + count * unit`, as a 4-byte record length
fn record_length(base: u32, count: usize, unit: u32) -> Result<u32, HprofError> {
    u32::try_from(count)
        .ok()
        .and_then(|count| count.checked_mul(unit))
        .and_then(|extra| extra.checked_add(base))
        .ok_or_else(|| HprofError::Io(io::Error::new(io::ErrorKind::InvalidInput, "record too large")))
}

fn too_large(tag: Tag) -> HprofError {
    HprofError::Io(io::Error::new(io::ErrorKind::InvalidInput, format!("{tag} record too large")))
}
