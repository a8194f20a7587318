//! Binary hprof reader
//!
//! Parses a record stream back into [`HprofData`].
//!
//! ## Strict vs. lenient
//!
//! Strict mode (the default) accepts exactly what [`BinaryHprofWriter`]
//! produces. Lenient mode additionally accepts what other producers emit in
//! practice:
//!
//! - duplicate STACK_TRACE records for the same (thread, frames): the
//!   duplicate id resolves to the first registration's count cell and
//!   CPU_SAMPLES counts for both ids are summed
//! - an END_THREAD directly following another END_THREAD for the same id
//!
//! [`BinaryHprofWriter`]: super::BinaryHprofWriter

use std::collections::HashMap;
use std::io::{self, Read};

use log::{debug, warn};

use super::{read_magic, Tag, ID_SIZE};
use crate::domain::{HprofError, ObjectId, ProfileError, StackTraceId, ThreadId};
use crate::model::{CountCell, HprofData, StackFrame, StackTrace, ThreadEvent};

/// Decodes a binary hprof stream.
///
/// ```rust,ignore
/// let mut reader = BinaryHprofReader::new(BufReader::new(File::open(path)?));
/// reader.set_strict(false)?;
/// reader.read()?;
/// let data = reader.into_hprof_data()?;
/// ```
pub struct BinaryHprofReader<R: Read> {
    input: R,
    strict: bool,
    started: bool,
    version: Option<String>,
    hprof_data: HprofData,
    id_to_string: HashMap<u32, String>,
    id_to_class_name: HashMap<u32, String>,
    id_to_stack_frame: HashMap<u32, StackFrame>,
    id_to_stack_trace: HashMap<StackTraceId, CountCell>,
}

impl<R: Read> BinaryHprofReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            strict: true,
            started: false,
            version: None,
            hprof_data: HprofData::new(),
            id_to_string: HashMap::new(),
            id_to_class_name: HashMap::new(),
            id_to_stack_frame: HashMap::new(),
            id_to_stack_trace: HashMap::new(),
        }
    }

    #[must_use]
    pub fn strict(&self) -> bool {
        self.strict
    }

    /// Choose strict or lenient parsing.
    ///
    /// # Errors
    /// [`ProfileError::IllegalState`] once [`read`](Self::read) has been called
    pub fn set_strict(&mut self, strict: bool) -> Result<(), ProfileError> {
        if self.started {
            return Err(ProfileError::IllegalState("cannot set strict after read()"));
        }
        self.strict = strict;
        Ok(())
    }

    /// Parse the whole stream.
    ///
    /// # Errors
    /// [`HprofError::Malformed`] for invalid content, [`HprofError::Truncated`]
    /// or [`HprofError::Io`] if the stream ends early or fails.
    pub fn read(&mut self) -> Result<(), HprofError> {
        if self.started {
            return Err(ProfileError::IllegalState("read() already called").into());
        }
        self.started = true;
        self.parse_header()?;
        let mut records = 0usize;
        while self.parse_record()? {
            records += 1;
        }
        debug!(
            "read {records} records: {} strings, {} classes, {} frames, {} stack traces",
            self.id_to_string.len(),
            self.id_to_class_name.len(),
            self.id_to_stack_frame.len(),
            self.id_to_stack_trace.len()
        );
        Ok(())
    }

    /// Header version string, e.g. `JAVA PROFILE 1.0.2`.
    ///
    /// # Errors
    /// [`ProfileError::IllegalState`] before a successful [`read`](Self::read)
    pub fn version(&self) -> Result<&str, ProfileError> {
        self.check_read()?;
        Ok(self.version.as_deref().unwrap_or_default())
    }

    /// # Errors
    /// [`ProfileError::IllegalState`] before a successful [`read`](Self::read)
    pub fn hprof_data(&self) -> Result<&HprofData, ProfileError> {
        self.check_read()?;
        Ok(&self.hprof_data)
    }

    /// # Errors
    /// [`ProfileError::IllegalState`] before a successful [`read`](Self::read)
    pub fn into_hprof_data(self) -> Result<HprofData, ProfileError> {
        self.check_read()?;
        Ok(self.hprof_data)
    }

    fn check_read(&self) -> Result<(), ProfileError> {
        if self.version.is_none() {
            return Err(ProfileError::IllegalState("data access before read()"));
        }
        Ok(())
    }

    fn parse_header(&mut self) -> Result<(), HprofError> {
        let magic = read_magic(&mut self.input)?;
        let id_size = self.read_u32()?;
        if id_size != ID_SIZE {
            return Err(HprofError::Malformed(format!(
                "Unsupported identifier size: {id_size}"
            )));
        }
        let start_millis = self.read_i64()?;
        self.hprof_data.set_start_millis(start_millis);
        debug!("header {magic:?}, start {start_millis}");
        self.version = Some(magic);
        Ok(())
    }

    /// Returns `false` at a clean end of stream
    fn parse_record(&mut self) -> Result<bool, HprofError> {
        let Some(tag_byte) = self.read_tag_or_eof()? else {
            return Ok(false);
        };
        let _time_delta_micros = self.read_u32()?;
        let length = self.read_u32()?;

        let Some(tag) = Tag::from_byte(tag_byte) else {
            debug!("skipping unknown tag 0x{tag_byte:02x} ({length} bytes)");
            self.skip(length)?;
            return Ok(true);
        };
        tag.check_size(length).map_err(HprofError::Malformed)?;

        match tag {
            Tag::StringInUtf8 => self.parse_string(length)?,
            Tag::LoadClass => self.parse_load_class()?,
            Tag::StackFrame => self.parse_stack_frame()?,
            Tag::StackTrace => self.parse_stack_trace(length)?,
            Tag::StartThread => self.parse_start_thread()?,
            Tag::EndThread => self.parse_end_thread()?,
            Tag::CpuSamples => self.parse_cpu_samples(length)?,
            Tag::ControlSettings => self.parse_control_settings()?,
            Tag::UnloadClass
            | Tag::AllocSites
            | Tag::HeapSummary
            | Tag::HeapDump
            | Tag::HeapDumpSegment
            | Tag::HeapDumpEnd => {
                debug!("skipping {tag} ({length} bytes)");
                self.skip(length)?;
            }
        }
        Ok(true)
    }

    fn parse_control_settings(&mut self) -> Result<(), HprofError> {
        let flags = self.read_u32()?;
        let depth = self.read_i16()?;
        let depth = u32::try_from(depth)
            .map_err(|_| HprofError::Malformed(format!("Negative stack trace depth: {depth}")))?;
        self.hprof_data.set_flags(flags);
        self.hprof_data.set_depth(depth);
        Ok(())
    }

    fn parse_string(&mut self, length: u32) -> Result<(), HprofError> {
        let id = self.read_id()?;
        let expected = u64::from(length - ID_SIZE);
        let mut bytes = Vec::new();
        (&mut self.input).take(expected).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != expected {
            return Err(HprofError::Truncated { expected, skipped: bytes.len() as u64 });
        }
        let string = String::from_utf8(bytes)
            .map_err(|_| HprofError::Malformed(format!("String id {id} is not valid UTF-8")))?;
        if self.id_to_string.insert(id, string).is_some() {
            return Err(HprofError::Malformed(format!("Duplicate string id: {id}")));
        }
        Ok(())
    }

    fn parse_load_class(&mut self) -> Result<(), HprofError> {
        let class_id = self.read_u32()?;
        let _class_object_id = self.read_id()?;
        let _stack_trace_serial = self.read_u32()?;
        let class_name = self.read_string()?.ok_or_else(|| {
            HprofError::Malformed(format!("Class id {class_id} has no name"))
        })?;
        if self.id_to_class_name.insert(class_id, class_name).is_some() {
            return Err(HprofError::Malformed(format!("Duplicate class id: {class_id}")));
        }
        Ok(())
    }

    fn parse_stack_frame(&mut self) -> Result<(), HprofError> {
        let frame_id = self.read_id()?;
        let method_name = self.read_string()?.unwrap_or_default();
        let _method_signature = self.read_string()?;
        let file_name = self.read_string()?;
        let class_name = self.read_class()?;
        let line_number = self.read_i32()?;
        let frame = StackFrame { class_name, method_name, file_name, line_number };
        if self.id_to_stack_frame.insert(frame_id, frame).is_some() {
            return Err(HprofError::Malformed(format!("Duplicate stack frame id: {frame_id}")));
        }
        Ok(())
    }

    fn parse_stack_trace(&mut self, length: u32) -> Result<(), HprofError> {
        let stack_trace_id = StackTraceId(self.read_u32()?);
        let thread_id = ThreadId(self.read_u32()?);
        let frame_count = self.read_u32()?;
        let expected = u64::from(Tag::StackTrace.base_length())
            + u64::from(frame_count) * u64::from(ID_SIZE);
        if u64::from(length) != expected {
            return Err(HprofError::Malformed(format!(
                "Expected stack trace record of size {expected} based on number of frames \
                 but header specified a length of {length}"
            )));
        }

        let mut frames = Vec::with_capacity(frame_count.min(1024) as usize);
        for _ in 0..frame_count {
            let frame_id = self.read_id()?;
            let frame = self.id_to_stack_frame.get(&frame_id).ok_or_else(|| {
                HprofError::Malformed(format!("Unknown stack frame id {frame_id}"))
            })?;
            frames.push(frame.clone());
        }
        let stack_trace = StackTrace::new(stack_trace_id, thread_id, frames);

        let existing = if self.strict { None } else { self.hprof_data.lookup(stack_trace.key()) };
        let cell = match existing {
            Some(cell) => {
                warn!("merging duplicate stack trace id {stack_trace_id} into an earlier one");
                cell
            }
            None => self.hprof_data.add_stack_trace(stack_trace).map_err(malformed)?,
        };

        if self.id_to_stack_trace.insert(stack_trace_id, cell).is_some() {
            return Err(HprofError::Malformed(format!(
                "Duplicate stack trace id: {stack_trace_id}"
            )));
        }
        Ok(())
    }

    fn parse_start_thread(&mut self) -> Result<(), HprofError> {
        let thread_id = ThreadId(self.read_u32()?);
        let object_id = ObjectId(self.read_id()?);
        let _stack_trace_serial = self.read_u32()?;
        let thread_name = self.read_string()?;
        let group_name = self.read_string()?;
        let parent_group_name = self.read_string()?;
        let event =
            ThreadEvent::start(object_id, thread_id, thread_name, group_name, parent_group_name);
        self.hprof_data.add_thread_event(event).map_err(malformed)
    }

    fn parse_end_thread(&mut self) -> Result<(), HprofError> {
        let thread_id = ThreadId(self.read_u32()?);
        match self.hprof_data.add_thread_event(ThreadEvent::end(thread_id)) {
            Err(ProfileError::DuplicateThreadEnd(id)) if !self.strict => {
                warn!("ignoring duplicate END_THREAD for id {id}");
                Ok(())
            }
            result => result.map_err(malformed),
        }
    }

    fn parse_cpu_samples(&mut self, length: u32) -> Result<(), HprofError> {
        let declared_total = self.read_u32()?;
        let trace_count = self.read_u32()?;
        let expected =
            u64::from(Tag::CpuSamples.base_length()) + u64::from(trace_count) * (4 + 4);
        if u64::from(length) != expected {
            return Err(HprofError::Malformed(format!(
                "Expected CPU samples record of size {expected} based on number of samples \
                 but header specified a length of {length}"
            )));
        }

        let mut total = 0u64;
        for _ in 0..trace_count {
            let count = self.read_u32()?;
            let stack_trace_id = StackTraceId(self.read_u32()?);
            if count == 0 {
                return Err(HprofError::Malformed(format!(
                    "Zero sample count for stack trace id {stack_trace_id}"
                )));
            }
            let cell = *self.id_to_stack_trace.get(&stack_trace_id).ok_or_else(|| {
                HprofError::Malformed(format!(
                    "CPU_SAMPLES refers to unknown stack trace id {stack_trace_id}"
                ))
            })?;

            let previous = self.hprof_data.count(cell);
            if self.strict {
                if previous != 0 {
                    return Err(HprofError::Malformed(format!(
                        "Setting sample count of stack trace id {stack_trace_id} to {count} \
                         found it was already initialized to {previous}"
                    )));
                }
                self.hprof_data.set_count(cell, count);
            } else {
                self.hprof_data.increment(cell, count).map_err(malformed)?;
            }
            total += u64::from(count);
        }

        if self.strict && total != u64::from(declared_total) {
            return Err(HprofError::Malformed(format!(
                "Expected a total of {declared_total} samples but saw {total}"
            )));
        }
        Ok(())
    }

    /// Resolve a string id; 0 is the absent string
    fn read_string(&mut self) -> Result<Option<String>, HprofError> {
        let id = self.read_id()?;
        if id == 0 {
            return Ok(None);
        }
        self.id_to_string
            .get(&id)
            .cloned()
            .map(Some)
            .ok_or_else(|| HprofError::Malformed(format!("String not found for id {id}")))
    }

    fn read_class(&mut self) -> Result<String, HprofError> {
        let id = self.read_u32()?;
        self.id_to_class_name
            .get(&id)
            .cloned()
            .ok_or_else(|| HprofError::Malformed(format!("Unknown class for id {id}")))
    }

    fn skip(&mut self, length: u32) -> Result<(), HprofError> {
        let expected = u64::from(length);
        let skipped = io::copy(&mut (&mut self.input).take(expected), &mut io::sink())?;
        if skipped != expected {
            return Err(HprofError::Truncated { expected, skipped });
        }
        Ok(())
    }

    fn read_tag_or_eof(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn read_id(&mut self) -> io::Result<u32> {
        self.read_u32()
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.input.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn read_i32(&mut self) -> io::Result<i32> {
        let mut buf = [0u8; 4];
        self.input.read_exact(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    fn read_i16(&mut self) -> io::Result<i16> {
        let mut buf = [0u8; 2];
        self.input.read_exact(&mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }

    fn read_i64(&mut self) -> io::Result<i64> {
        let mut buf = [0u8; 8];
        self.input.read_exact(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }
}

/// Aggregator rejections while decoding are malformed input
#[allow(clippy::needless_pass_by_value)]
fn malformed(err: ProfileError) -> HprofError {
    HprofError::Malformed(err.to_string())
}
