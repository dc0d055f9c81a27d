/// Transfer direction of the data phase, seen from the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataDirection {
    None,
    ToDevice,
    FromDevice,
    ToFromDevice,
    Unknown,
}

impl DataDirection {
    pub fn is_data_transfer(self) -> bool {
        matches!(
            self,
            DataDirection::ToDevice | DataDirection::FromDevice | DataDirection::ToFromDevice
        )
    }
}
