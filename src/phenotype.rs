//! Module for simulating binary phenotypes under a single-element odds ratio model.
//!
//! Domain for the probability functions: `odds_ratio > 0`, `0 < maf < 1`,
//! `sr > 0`. Inputs are not validated here; `SimulationConfig::validate`
//! checks them once before a sweep starts. Even inside that domain the model
//! can leave `[0, 1]` (OR 0.1, MAF 0.9, Sr 1 gives about 2.63 for the absent
//! group); labels then saturate at all-case or all-control, and `validate`
//! warns about the affected odds ratios.
use crate::Sample;
use rand::Rng;
use std::io::Write;

/// Probability that an individual *without* the element is a case.
///
/// `1 / ((1 + 1/Sr) * (MAF * (OR - 1) + 1))`. With `OR = 1` this collapses
/// to `1 / (1 + 1/Sr)` regardless of MAF.
pub fn prob_case_given_absent(odds_ratio: f64, maf: f64, sr: f64) -> f64 {
    1.0 / ((1.0 + 1.0 / sr) * (maf * (odds_ratio - 1.0) + 1.0))
}

/// Probability that an individual carrying the element is a case.
pub fn prob_case_given_present(odds_ratio: f64, maf: f64, sr: f64) -> f64 {
    1.0 - prob_case_given_absent(odds_ratio, maf, sr)
}

/// Binary label for one sampled individual.
#[derive(Debug, Clone, PartialEq)]
pub struct PhenotypeRecord {
    pub name: String,
    /// 1 = case, 0 = control
    pub label: u8,
}

/// Assigns a case/control label to each sampled individual, in index order.
///
/// One uniform draw in `[0, 1)` per individual is compared against the case
/// probability for that individual's element status.
pub fn assign_phenotypes<R: Rng + ?Sized>(
    roster: &[Sample],
    indices: &[usize],
    p_absent: f64,
    rng: &mut R,
) -> Vec<PhenotypeRecord> {
    let p_present = 1.0 - p_absent;

    indices
        .iter()
        .map(|&idx| {
            let sample = &roster[idx];
            let draw: f64 = rng.gen();
            let threshold = if sample.element_present { p_present } else { p_absent };
            PhenotypeRecord {
                name: sample.name.clone(),
                label: u8::from(draw < threshold),
            }
        })
        .collect()
}

/// Writes `name<TAB>label` lines, one per record.
pub fn write_phenotypes<W: Write>(
    writer: W,
    records: &[PhenotypeRecord],
) -> Result<(), csv::Error> {
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(writer);

    for record in records {
        let label = record.label.to_string();
        csv_writer.write_record([record.name.as_str(), label.as_str()])?;
    }
    csv_writer.flush()?;
    Ok(())
}
