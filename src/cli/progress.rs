use std::time::Instant;

pub struct ProgressIndicator {
    total: usize,
    completed: usize,
    failed: usize,
    cached: usize,
    start_time: Instant,
}

impl ProgressIndicator {
    pub fn new() -> Self {
        Self {
            total: 0,
            completed: 0,
            failed: 0,
            cached: 0,
            start_time: Instant::now(),
        }
    }

    pub fn set_total(&mut self, total: usize) {
        self.total = total;
    }

    pub fn complete_item(&mut self, success: bool) {
        if success {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn cached_item(&mut self) {
        self.cached += 1;
    }

    pub fn finish(&self, verification: &str) {
        let elapsed = self.start_time.elapsed();
        println!("\n{}", "=".repeat(60));
        println!("Summary:");
        println!("  Planned:      {}", self.total);
        println!("  Generated:    {}", self.completed);
        println!("  Cached:       {}", self.cached);
        println!("  Failed:       {}", self.failed);
        println!("  Verification: {}", verification);
        println!("  Duration:     {:.2}s", elapsed.as_secs_f64());
        println!("{}", "=".repeat(60));
    }
}
