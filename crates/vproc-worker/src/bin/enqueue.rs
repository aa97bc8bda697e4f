//! Enqueue video processing jobs from the command line.
//!
//! Usage: `vproc-enqueue <video-id>...`

use vproc_models::VideoId;
use vproc_queue::JobQueue;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let ids: Vec<VideoId> = std::env::args()
        .skip(1)
        .map(|arg| {
            VideoId::parse(arg.as_str()).map_err(|e| anyhow::anyhow!("{}: {:?}", e, arg))
        })
        .collect::<anyhow::Result<_>>()?;

    if ids.is_empty() {
        anyhow::bail!("usage: vproc-enqueue <video-id>...");
    }

    let queue = JobQueue::from_env()?;
    queue.init().await?;

    for id in &ids {
        let message_id = queue.enqueue_video_processing(id).await?;
        println!("{}\t{}", id, message_id);
    }

    Ok(())
}
