//! Customer contact records attached to takeout / call-in checks.

use serde::{Deserialize, Serialize};

use common::datafile::{DataFileError, InputDataFile, OutputDataFile};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub comment: String,
}

impl CustomerInfo {
    pub fn write(&self, out: &mut OutputDataFile) -> Result<(), DataFileError> {
        out.put_str(&self.name)?;
        out.put_str(&self.phone)?;
        out.put_str(&self.address)?;
        out.put_str(&self.comment)
    }

    pub fn read(input: &mut InputDataFile) -> Result<Self, DataFileError> {
        Ok(Self {
            name: input.get_str()?,
            phone: input.get_str()?,
            address: input.get_str()?,
            comment: input.get_str()?,
        })
    }
}
