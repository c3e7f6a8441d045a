use super::{Tag, Transport};

/// The world of a process that runs without any interprocess communication.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn send(&self, dest: usize, tag: Tag, _data: Vec<u8>) {
        crate::bug!("{:?} message to rank {} in a single rank world", tag, dest)
    }
    fn recv(&self, source: usize, tag: Tag) -> Vec<u8> {
        crate::bug!("{:?} message from rank {} in a single rank world", tag, source)
    }
}
