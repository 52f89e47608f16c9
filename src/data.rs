//! Reading and writing of datasets and sampler outputs.

use crate::model::Trajectory;
use crate::utils::check_times;
use anyhow::{Context, Result, bail};
use rmp_serde::{decode, encode};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Load an observed dataset from a TOML file with `[[rows]]` entries.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed, is empty, or its
/// times are not strictly increasing.
pub fn read_observed<P: AsRef<Path>>(file: P) -> Result<Trajectory> {
    let file = file.as_ref();
    let contents = fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
    let obs: Trajectory = toml::from_str(&contents).context("failed to deserialize dataset")?;

    if obs.is_empty() {
        bail!("dataset must contain at least one row");
    }
    check_times(&obs.times()).context("invalid dataset times")?;

    Ok(obs)
}

pub fn write_observed<P: AsRef<Path>>(obs: &Trajectory, file: P) -> Result<()> {
    let file = file.as_ref();
    let contents = toml::to_string(obs).context("failed to serialize dataset")?;
    fs::write(file, contents).with_context(|| format!("failed to write {file:?}"))?;
    Ok(())
}

/// Write a MessagePack-encoded value.
pub fn write_msgpack<T: Serialize, P: AsRef<Path>>(value: &T, file: P) -> Result<()> {
    let file = file.as_ref();
    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(file);
    encode::write(&mut writer, value).context("failed to serialize value")?;
    writer.flush().context("failed to flush writer stream")?;
    Ok(())
}

/// Read a MessagePack-encoded value.
pub fn read_msgpack<T: DeserializeOwned, P: AsRef<Path>>(file: P) -> Result<T> {
    let file = file.as_ref();
    let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
    let mut reader = BufReader::new(file);
    let value = decode::from_read(&mut reader).context("failed to deserialize value")?;
    Ok(value)
}
