//! Common random numbers.
//!
//! Every uniform draw is addressed by `(stream seed, patient, index)` and read
//! from a counter-positioned ChaCha stream, so a patient's draws do not depend
//! on the order in which patients or submodels are evaluated. Draws are cached
//! in per-patient arrays sized when the cache is built.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::types::{Clock, PatientId};

/// Uniform [0, 1) draw number `index` of `patient` in the stream `seed`.
pub fn uniform(seed: u64, patient: PatientId, index: usize) -> f64 {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    rng.set_stream(patient.0 as u64);
    // An f64 consumes two 32-bit words.
    rng.set_word_pos(index as u128 * 2);
    rng.random::<f64>()
}

/// One fixed draw per patient and slot, reused for the whole run.
#[derive(Debug, Clone)]
pub struct UniqueDraws {
    seed: u64,
    slots: usize,
    values: Vec<f64>,
}

impl UniqueDraws {
    pub fn new(seed: u64, n_patients: usize, slots: usize) -> Self {
        let slots = slots.max(1);
        let mut draws = UniqueDraws { seed, slots, values: Vec::new() };
        draws.fill(n_patients);
        draws
    }

    /// Cache built from externally supplied draws, laid out patient-major
    /// (`values[patient * slots + slot]`). Resetting it switches to a
    /// generated stream.
    pub fn from_values(slots: usize, values: Vec<f64>) -> Self {
        UniqueDraws { seed: 0, slots: slots.max(1), values }
    }

    fn fill(&mut self, n_patients: usize) {
        self.values = (0..n_patients)
            .flat_map(|p| (0..self.slots).map(move |s| (p, s)))
            .map(|(p, s)| uniform(self.seed, PatientId(p), s))
            .collect();
    }

    /// # Panics
    /// If `patient` is outside the cohort or `slot` outside the cache width.
    pub fn get(&self, patient: PatientId, slot: usize) -> f64 {
        assert!(slot < self.slots, "draw slot {slot} out of range");
        self.values[patient.0 * self.slots + slot]
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn n_patients(&self) -> usize {
        self.values.len() / self.slots
    }

    /// Replace every cached draw with a fresh stream.
    pub fn reset(&mut self, seed: u64) {
        self.seed = seed;
        let n = self.n_patients();
        self.fill(n);
    }
}

/// A per-patient sequence of draws consumed one at a time, for events that
/// recur over a patient's lifetime.
#[derive(Debug, Clone)]
pub struct RecurringDraws {
    seed: u64,
    values: Vec<Vec<f64>>,
    next: Vec<usize>,
}

impl RecurringDraws {
    pub fn new(seed: u64, n_patients: usize) -> Self {
        RecurringDraws { seed, values: vec![Vec::new(); n_patients], next: vec![0; n_patients] }
    }

    /// Consume the next draw for `patient`, generating it on first use.
    pub fn next(&mut self, patient: PatientId) -> f64 {
        let p = patient.0;
        let index = self.next[p];
        if index == self.values[p].len() {
            let u = uniform(self.seed, patient, index);
            self.values[p].push(u);
        }
        self.next[p] += 1;
        self.values[p][index]
    }

    /// Give back the most recently consumed draw so the next call reuses it.
    pub fn cancel_last(&mut self, patient: PatientId) {
        let next = &mut self.next[patient.0];
        *next = next.saturating_sub(1);
    }

    /// Start every patient's sequence over, keeping the cached draws.
    pub fn rewind(&mut self) {
        self.next.iter_mut().for_each(|n| *n = 0);
    }

    /// Drop every cached draw and switch to a fresh stream.
    pub fn reset(&mut self, seed: u64) {
        self.seed = seed;
        self.values.iter_mut().for_each(Vec::clear);
        self.rewind();
    }
}

/// Run-level uses of the master seed. Each gets its own ChaCha stream; the
/// draw caches of iteration `i` read stream `i`, well below the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Cohort,
    Parameters { iteration: usize },
}

impl Stream {
    fn id(self) -> u64 {
        match self {
            Stream::Cohort => u64::MAX,
            Stream::Parameters { iteration } => (1 << 63) + iteration as u64,
        }
    }
}

pub fn stream_rng(seed: u64, stream: Stream) -> ChaCha20Rng {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    rng.set_stream(stream.id());
    rng
}

/// Per-iteration construction context: cohort size, clock and a seeded source
/// of independent stream seeds. Submodels built in the same order from the same
/// context receive the same streams.
#[derive(Debug, Clone)]
pub struct RunContext {
    rng: ChaCha20Rng,
    pub iteration: usize,
    pub n_patients: usize,
    pub clock: Clock,
}

impl RunContext {
    pub fn new(seed: u64, iteration: usize, n_patients: usize, clock: Clock) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        rng.set_stream(iteration as u64);
        RunContext { rng, iteration, n_patients, clock }
    }

    pub fn next_seed(&mut self) -> u64 {
        self.rng.random()
    }

    /// Child context with its own seed, so what one submodel draws never
    /// shifts the streams of the next.
    pub fn fork(&mut self) -> RunContext {
        let seed = self.next_seed();
        RunContext::new(seed, self.iteration, self.n_patients, self.clock)
    }

    pub fn unique(&mut self, slots: usize) -> UniqueDraws {
        let seed = self.next_seed();
        UniqueDraws::new(seed, self.n_patients, slots)
    }

    pub fn recurring(&mut self) -> RecurringDraws {
        let seed = self.next_seed();
        RecurringDraws::new(seed, self.n_patients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_is_a_pure_function_of_its_address() {
        let a = uniform(7, PatientId(3), 5);
        let b = uniform(7, PatientId(3), 5);
        assert_eq!(a.to_bits(), b.to_bits());
        assert!((0.0..1.0).contains(&a));
        assert_ne!(a, uniform(7, PatientId(4), 5));
        assert_ne!(a, uniform(7, PatientId(3), 6));
        assert_ne!(a, uniform(8, PatientId(3), 5));
    }

    #[test]
    fn unique_draws_match_stream_and_survive_repeated_reads() {
        let draws = UniqueDraws::new(11, 4, 2);
        assert_eq!(draws.n_patients(), 4);
        for p in 0..4 {
            for s in 0..2 {
                let u = draws.get(PatientId(p), s);
                assert_eq!(u, uniform(11, PatientId(p), s));
                assert_eq!(u, draws.get(PatientId(p), s));
            }
        }
    }

    #[test]
    fn unique_reset_changes_draws() {
        let mut draws = UniqueDraws::new(1, 3, 1);
        let before = draws.get(PatientId(2), 0);
        draws.reset(2);
        assert_ne!(before, draws.get(PatientId(2), 0));
        assert_eq!(draws.n_patients(), 3);
    }

    #[test]
    fn recurring_consumes_and_cancels() {
        let mut draws = RecurringDraws::new(5, 2);
        let p = PatientId(1);
        let first = draws.next(p);
        let second = draws.next(p);
        assert_ne!(first, second);

        draws.cancel_last(p);
        assert_eq!(draws.next(p), second);

        draws.rewind();
        assert_eq!(draws.next(p), first);
        // Other patients are untouched.
        assert_eq!(draws.next(PatientId(0)), RecurringDraws::new(5, 2).next(PatientId(0)));
    }

    #[test]
    fn recurring_draws_are_order_independent() {
        let mut a = RecurringDraws::new(9, 3);
        let mut b = RecurringDraws::new(9, 3);
        let a0 = a.next(PatientId(0));
        let a2 = a.next(PatientId(2));
        let b2 = b.next(PatientId(2));
        let b0 = b.next(PatientId(0));
        assert_eq!(a0, b0);
        assert_eq!(a2, b2);
    }

    #[test]
    fn cancel_last_on_fresh_patient_is_a_no_op() {
        let mut draws = RecurringDraws::new(5, 1);
        draws.cancel_last(PatientId(0));
        let first = RecurringDraws::new(5, 1).next(PatientId(0));
        assert_eq!(draws.next(PatientId(0)), first);
    }

    #[test]
    fn contexts_with_same_seed_hand_out_same_streams() {
        let clock = Clock::default();
        let mut a = RunContext::new(42, 0, 10, clock);
        let mut b = RunContext::new(42, 0, 10, clock);
        assert_eq!(a.next_seed(), b.next_seed());
        let mut c = RunContext::new(42, 1, 10, clock);
        let mut d = RunContext::new(42, 0, 10, clock);
        assert_ne!(c.next_seed(), d.next_seed());
    }

    #[test]
    fn cohort_parameter_and_cache_streams_are_disjoint() {
        let seed = 42;
        let cohort: u64 = stream_rng(seed, Stream::Cohort).random();
        let params: u64 = stream_rng(seed, Stream::Parameters { iteration: 0 }).random();
        let params_next: u64 = stream_rng(seed, Stream::Parameters { iteration: 1 }).random();
        let caches = RunContext::new(seed, 0, 1, Clock::default()).next_seed();
        assert_ne!(cohort, params);
        assert_ne!(cohort, caches);
        assert_ne!(params, caches);
        assert_ne!(params, params_next);
        assert_eq!(params, stream_rng(seed, Stream::Parameters { iteration: 0 }).random::<u64>());
    }

    #[test]
    fn forks_are_reproducible_and_distinct() {
        let clock = Clock::default();
        let mut a = RunContext::new(42, 0, 10, clock);
        let mut b = RunContext::new(42, 0, 10, clock);
        let (mut a1, mut a2) = (a.fork(), a.fork());
        let mut b1 = b.fork();
        assert_eq!(a1.next_seed(), b1.next_seed());
        assert_ne!(a1.next_seed(), a2.next_seed());
        assert_eq!(a1.n_patients, 10);
    }
}
