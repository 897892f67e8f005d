mod file;

use serde::{de::DeserializeOwned, Serialize};
use std::io::{BufReader, BufWriter, ErrorKind, Result, Write};

pub use file::AtomicFile;

/// Read-modify-write of a JSON value stored in `atomic_file`.
///
/// The operator sees `None` when nothing was stored yet. It may run more
/// than once when other writers race us, so it must not have side effects
/// outside of the value.
pub fn modify_json<T, R>(
    atomic_file: &AtomicFile,
    mut operator: impl FnMut(&mut Option<T>) -> R,
) -> Result<R>
where
    T: Serialize + DeserializeOwned,
{
    loop {
        let latest = atomic_file.load()?;
        let mut value: Option<T> = match latest.open()? {
            Some(file) => serde_json::from_reader(BufReader::new(file))?,
            None => None,
        };
        let output = operator(&mut value);

        let tmp = atomic_file.make_temp()?;
        let mut writer = BufWriter::new(&tmp);
        serde_json::to_writer(&mut writer, &value)?;
        writer.flush()?;
        drop(writer);

        match atomic_file.compare_and_swap(&latest, tmp) {
            Ok(()) => return Ok(output),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                log::debug!("concurrent write detected, retrying");
                continue;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Load the JSON value stored in `atomic_file`, if any.
pub fn load_json<T: DeserializeOwned>(
    atomic_file: &AtomicFile,
) -> Result<Option<T>> {
    let latest = atomic_file.load()?;
    match latest.open()? {
        Some(file) => Ok(serde_json::from_reader(BufReader::new(file))?),
        None => Ok(None),
    }
}
