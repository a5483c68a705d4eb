//! Module for drawing fixed-size subsamples of the population roster.
use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SampleError {
    #[error("Insufficient population: requested {requested} samples but only {available} available")]
    InsufficientPopulation { requested: usize, available: usize },
}

/// Draws `size` distinct indices from `0..population_size` by reservoir sampling.
///
/// The reservoir starts as `0..size`; each later index `i` replaces slot `j`
/// when a uniform draw `j` in `[0, i]` falls inside the reservoir. A single
/// pass with `O(size)` memory, every index equally likely to be kept.
///
/// Fails with `SampleError::InsufficientPopulation` when `size > population_size`.
pub fn reservoir_sample<R: Rng + ?Sized>(
    size: usize,
    population_size: usize,
    rng: &mut R,
) -> Result<Vec<usize>, SampleError> {
    if size > population_size {
        return Err(SampleError::InsufficientPopulation {
            requested: size,
            available: population_size,
        });
    }

    let mut reservoir: Vec<usize> = (0..size).collect();
    if size == 0 {
        return Ok(reservoir);
    }

    for i in size..population_size {
        let j = rng.gen_range(0..=i);
        if j < size {
            reservoir[j] = i;
        }
    }

    Ok(reservoir)
}
