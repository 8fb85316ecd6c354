use std::sync::Mutex;

/// Line buffer for the partition-tree trace. Workers append concurrently; the
/// controller writes the buffer to a file at the end of the run. Disabled
/// traces drop messages without formatting cost at the call sites that check
/// `enabled()` first.
pub struct TraceLog {
    enabled: bool,
    lines: Mutex<Vec<String>>,
}

impl TraceLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn log(&self, msg: String) {
        if !self.enabled {
            return;
        }
        let worker = rayon::current_thread_index()
            .map(|i| i.to_string())
            .unwrap_or_else(|| "main".to_string());
        self.lines
            .lock()
            .unwrap()
            .push(format!("[worker {}] {}", worker, msg));
    }

    pub fn write(&self, path: &str) -> std::io::Result<()> {
        use std::io::Write;
        let mut f = std::fs::File::create(path)?;
        for line in self.lines.lock().unwrap().iter() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}
