use crate::domain::{Instrument, RevcompOverride};
use crate::error::ImportError;

/// Case-preserving DNA complement. Characters outside the four-letter
/// alphabet (separators, ambiguity bases) pass through unchanged.
fn complement(base: char) -> char {
    match base {
        'A' => 'T',
        'T' => 'A',
        'C' => 'G',
        'G' => 'C',
        'a' => 't',
        't' => 'a',
        'c' => 'g',
        'g' => 'c',
        other => other,
    }
}

pub fn reverse_complement(sequence: &str) -> String {
    sequence.chars().rev().map(complement).collect()
}

fn orientation_for(instrument: Instrument) -> RevcompOverride {
    match instrument {
        Instrument::HiSeqX => RevcompOverride::ReverseBoth,
        Instrument::NextSeq550 => RevcompOverride::ReverseBoth,
        Instrument::HiSeq2500 => RevcompOverride::ReverseI7,
    }
}

/// Decodes a raw dual-index barcode into its true biological orientation.
///
/// The raw form is `"I7-I5"`. An explicit override takes precedence over
/// the instrument table; with neither, decoding fails. Reverse-both is the
/// reverse complement of the entire raw string: the separator survives the
/// complement and whole-string reversal swaps the arms, which is the
/// orientation the LIMS registers for those chemistries. The transform is
/// its own inverse.
pub fn decode_index(
    raw_index: &str,
    instrument: Option<Instrument>,
    override_: Option<RevcompOverride>,
) -> Result<String, ImportError> {
    let (i7, i5) = raw_index
        .split_once('-')
        .ok_or_else(|| ImportError::InvalidRecord(format!("index without separator: {raw_index}")))?;

    let transform = match override_ {
        Some(value) => value,
        None => match instrument {
            Some(instrument) => orientation_for(instrument),
            None => {
                return Err(ImportError::UnsupportedInstrument(
                    "none reported".to_string(),
                ));
            }
        },
    };

    Ok(match transform {
        RevcompOverride::KeepBoth => raw_index.to_string(),
        RevcompOverride::ReverseI5 => format!("{i7}-{}", reverse_complement(i5)),
        RevcompOverride::ReverseI7 => format!("{}-{i5}", reverse_complement(i7)),
        RevcompOverride::ReverseBoth => reverse_complement(raw_index),
    })
}
