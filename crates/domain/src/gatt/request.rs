use crate::path::ObjectPath;

/// Options accompanying a remote read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadRequest {
    /// Byte offset requested by the central.
    pub offset: u16,
    /// Negotiated ATT MTU, when the bus reports it.
    pub mtu: Option<u16>,
    /// Address of the requesting device, when known.
    pub device: Option<String>,
}

impl ReadRequest {
    /// Slice a cached value according to the requested offset.
    pub(crate) fn slice(&self, value: &[u8]) -> Option<Vec<u8>> {
        value.get(usize::from(self.offset)..).map(<[u8]>::to_vec)
    }
}

/// Receives signals from characteristics bound into a published tree.
///
/// Implemented by the application layer to forward value changes to the
/// peripheral publisher and to publish state changes on its event bus.
pub trait TreeObserver: Send + Sync {
    /// A notifying characteristic received a new value.
    fn value_changed(&self, path: &ObjectPath, value: &[u8]);

    /// A characteristic started or stopped notifying.
    fn notifying_changed(&self, path: &ObjectPath, notifying: bool);

    /// A central wrote a characteristic value and the write was accepted.
    fn value_written(&self, path: &ObjectPath, value: &[u8]);
}
