//! Hand-assembled binary hprof streams

#![allow(dead_code)]

pub const CPU_SAMPLING: u32 = 0x02;

/// Builder for a record stream, one record per call
pub struct HprofStream {
    bytes: Vec<u8>,
}

impl HprofStream {
    pub fn new(start_millis: i64) -> Self {
        let mut bytes = b"JAVA PROFILE 1.0.2\0".to_vec();
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(&start_millis.to_be_bytes());
        Self { bytes }
    }

    pub fn record(mut self, tag: u8, payload: &[u8]) -> Self {
        self.bytes.push(tag);
        self.bytes.extend_from_slice(&0u32.to_be_bytes());
        self.bytes.extend_from_slice(&u32::try_from(payload.len()).unwrap().to_be_bytes());
        self.bytes.extend_from_slice(payload);
        self
    }

    pub fn string(self, id: u32, value: &str) -> Self {
        let mut payload = id.to_be_bytes().to_vec();
        payload.extend_from_slice(value.as_bytes());
        self.record(0x01, &payload)
    }

    pub fn load_class(self, class_id: u32, name_id: u32) -> Self {
        self.record(0x02, &words(&[class_id, 0, 0, name_id]))
    }

    pub fn stack_frame(self, frame_id: u32, method_id: u32, file_id: u32, class_id: u32, line: i32) -> Self {
        let mut payload = words(&[frame_id, method_id, 0, file_id, class_id]);
        payload.extend_from_slice(&line.to_be_bytes());
        self.record(0x04, &payload)
    }

    pub fn stack_trace(self, trace_id: u32, thread_id: u32, frame_ids: &[u32]) -> Self {
        let mut payload = words(&[trace_id, thread_id, u32::try_from(frame_ids.len()).unwrap()]);
        payload.extend_from_slice(&words(frame_ids));
        self.record(0x05, &payload)
    }

    pub fn start_thread(self, thread_id: u32, object_id: u32, name_id: u32) -> Self {
        self.record(0x0a, &words(&[thread_id, object_id, 0, name_id, 0, 0]))
    }

    pub fn end_thread(self, thread_id: u32) -> Self {
        self.record(0x0b, &words(&[thread_id]))
    }

    pub fn cpu_samples(self, total: u32, samples: &[(u32, u32)]) -> Self {
        let mut payload = words(&[total, u32::try_from(samples.len()).unwrap()]);
        for &(count, trace_id) in samples {
            payload.extend_from_slice(&words(&[count, trace_id]));
        }
        self.record(0x0d, &payload)
    }

    pub fn control_settings(self, flags: u32, depth: i16) -> Self {
        let mut payload = flags.to_be_bytes().to_vec();
        payload.extend_from_slice(&depth.to_be_bytes());
        self.record(0x0e, &payload)
    }

    /// Thread 1 started, with one frame `Main.run(Main.java:7)` as frame 1
    pub fn with_thread_and_frame(start_millis: i64) -> Self {
        Self::new(start_millis)
            .control_settings(CPU_SAMPLING, 4)
            .string(1, "main")
            .start_thread(1, 1, 1)
            .string(2, "Main")
            .load_class(1, 2)
            .string(3, "run")
            .string(4, "Main.java")
            .stack_frame(1, 3, 4, 1, 7)
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

pub fn words(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}
