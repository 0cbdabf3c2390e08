// SPDX-License-Identifier: Apache-2.0

//! A tiny demonstration binary exercising the handful of structured-
//! concurrency patterns the `tether` crate exists for: a background
//! `spawn` feeding a [`tether::Signal`], a subscriber draining it, and a
//! `with_timeout` race against a fast operation. Owns logger init and
//! Ctrl-C handling, as a binary entry point should, while the library
//! itself stays silent about both.

use std::time::Duration;

use tether::{Frame, Next, Outcome};

#[tokio::main]
async fn main() {
    env_logger::init();

    std::panic::set_hook(Box::new(|p| {
        log::error!("{p}");
    }));

    match tether::main(demo).await {
        Ok(()) => log::info!("demo finished cleanly"),
        Err(e) => log::error!("demo failed: {e}"),
    }
}

async fn demo(frame: Frame) -> Result<(), tether::Error> {
    let signal = tether::create_signal::<u32, &'static str>(&frame, 8).await;
    let mut sub = signal.subscribe(&frame).await;

    let ticker = frame
        .spawn::<(), _>({
            let signal = signal.clone();
            move |_frame: Frame| async move {
                for tick in 0..3u32 {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    signal.send(tick);
                }
                signal.close("ticks exhausted");
                Ok(())
            }
        })
        .await?;

    loop {
        match sub.next().await {
            Some(Next::Value(tick)) => log::info!("observed tick {tick}"),
            Some(Next::Done(reason)) => {
                log::info!("signal closed: {reason}");
                break;
            }
            None => break,
        }
    }
    if let Outcome::Error(e) = ticker.join().await {
        return Err(e);
    }

    let fast = |frame: Frame| async move { tether::sleep(&frame, Duration::from_millis(10)).await };
    match tether::with_timeout(&frame, Duration::from_millis(200), fast).await {
        Ok(()) => log::info!("quick operation beat the deadline"),
        Err(e) => log::warn!("unexpected timeout: {e}"),
    }

    Ok(())
}
