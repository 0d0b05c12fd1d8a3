//! Payload stream type and test utilities.

use futures_util::stream::BoxStream;

/// A forward-only stream of uploaded bytes.
///
/// Streams are moved into [`UploadBackend::upload`](crate::UploadBackend::upload) and therefore
/// consumed exactly once.
pub type PayloadStream = BoxStream<'static, std::io::Result<bytes::Bytes>>;

/// Creates a [`PayloadStream`] from a byte slice.
#[cfg(test)]
pub(crate) fn make_stream(contents: &[u8]) -> PayloadStream {
    use futures_util::StreamExt;
    tokio_stream::once(Ok(contents.to_vec().into())).boxed()
}

/// Creates a [`PayloadStream`] that yields `contents` in chunks of `chunk_size` bytes.
#[cfg(test)]
pub(crate) fn make_chunked_stream(contents: &[u8], chunk_size: usize) -> PayloadStream {
    use futures_util::StreamExt;
    let chunks: Vec<std::io::Result<bytes::Bytes>> = contents
        .chunks(chunk_size)
        .map(|chunk| Ok(bytes::Bytes::copy_from_slice(chunk)))
        .collect();
    futures_util::stream::iter(chunks).boxed()
}

/// Creates a [`PayloadStream`] that yields `contents` and then fails.
#[cfg(test)]
pub(crate) fn make_failing_stream(contents: &[u8]) -> PayloadStream {
    use futures_util::StreamExt;
    let items: Vec<std::io::Result<bytes::Bytes>> = vec![
        Ok(contents.to_vec().into()),
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "client went away",
        )),
    ];
    futures_util::stream::iter(items).boxed()
}
