use crate::{
    codec::SessionCodec,
    options::ScanOptions,
    source::{SessionSource, SourceItem},
    stats::{Report, SessionStats},
    store::SessionStore,
};

/// Runs one analysis pass over `store` and returns the summary.
pub async fn analyze(
    store: &SessionStore,
    codec: &dyn SessionCodec,
    options: &ScanOptions,
) -> anyhow::Result<Report> {
    let total = store.count_all().await?;
    let mut source = SessionSource::from_options(store, options)?;

    match &source {
        SessionSource::Scan(_) => {
            let matching = store.count_bigger_than(options.bigger_than).await?;
            tracing::info!(
                total,
                matching,
                bigger_than = options.bigger_than,
                batch_size = options.batch_size,
                "scanning sessions"
            );
        }
        SessionSource::Ids(lookup) => {
            tracing::info!(total, ids = lookup.remaining(), "looking up sessions by id");
        }
    }

    let mut stats = SessionStats::new(total);
    while let Some(item) = source.next().await? {
        match item {
            SourceItem::Found(record) => stats.record(&record, codec)?,
            SourceItem::Missing(session_key) => {
                tracing::warn!(session_key = %session_key, "session not found, skipping");
                stats.record_missing();
            }
        }
    }

    tracing::info!(
        processed = stats.processed(),
        missing = stats.missing(),
        "analysis finished"
    );
    Ok(stats.report())
}
