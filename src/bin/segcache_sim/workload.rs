use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Zipf};

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum Pattern {
    Uniform,
    Zipf,
    Scan,
}

/// One range read against one simulated remote file.
#[derive(Clone, Copy, Debug)]
pub struct ReadOp {
    pub file: usize,
    pub offset: u64,
    pub len: u64,
}

pub fn generate_workload(
    pattern: Pattern,
    num_files: usize,
    file_size: u64,
    min_read: u64,
    max_read: u64,
    num_requests: usize,
    zipf_exponent: f64,
    seed: u64,
) -> Vec<ReadOp> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut requests = Vec::with_capacity(num_requests);

    let zipf_dist = if matches!(pattern, Pattern::Zipf) {
        Some(Zipf::new(num_files as f64, zipf_exponent).expect("invalid zipf parameters"))
    } else {
        None
    };

    let mut scan_file: usize = 0;
    let mut scan_offset: u64 = 0;

    for _ in 0..num_requests {
        let len = if min_read == max_read {
            min_read
        } else {
            rng.random_range(min_read..=max_read)
        }
        .min(file_size);

        let (file, offset) = match pattern {
            Pattern::Uniform => {
                let file = rng.random_range(0..num_files);
                (file, rng.random_range(0..=file_size - len))
            }
            Pattern::Zipf => {
                // Zipf returns values in [1, num_files]
                let sample: f64 = zipf_dist.as_ref().unwrap().sample(&mut rng);
                let file = (sample as usize).saturating_sub(1).min(num_files - 1);
                (file, rng.random_range(0..=file_size - len))
            }
            Pattern::Scan => {
                let file = scan_file;
                let offset = scan_offset.min(file_size - len);
                scan_offset += len;
                if scan_offset >= file_size {
                    scan_offset = 0;
                    scan_file = (scan_file + 1) % num_files;
                }
                (file, offset)
            }
        };

        requests.push(ReadOp { file, offset, len });
    }

    requests
}
