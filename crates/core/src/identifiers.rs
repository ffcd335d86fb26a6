use crate::models::{Chunk, ChunkId};

/// Assigns `{source}:{page}:{sequence}` ids in input order.
///
/// The sequence restarts at 0 whenever `(source, page)` differs from the
/// previous chunk's, so the same ordered input always yields the same ids.
pub fn assign_chunk_ids(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut last_key: Option<(String, u32)> = None;
    let mut sequence = 0u64;

    for chunk in &mut chunks {
        let same_key = last_key
            .as_ref()
            .is_some_and(|(source, page)| *source == chunk.source && *page == chunk.page);

        if same_key {
            sequence += 1;
        } else {
            sequence = 0;
            last_key = Some((chunk.source.clone(), chunk.page));
        }

        chunk.id = Some(ChunkId::new(&chunk.source, chunk.page, sequence));
    }

    chunks
}
