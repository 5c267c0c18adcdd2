//! 上传 + 实时同步演示
//!
//! 用法：
//! ```text
//! MEDIASYNC_API=https://lms.example.com/ MEDIASYNC_JWT=... \
//!     cargo run --example upload_demo -- videos <video-id> ./lecture.mp4
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use mediasync_sdk::{
    init_tracing, MediaSyncConfig, MediaSyncError, MediaSyncSDK, ObjectType, Result, SDKEvent, SessionIdentity,
    UploadFile, UploadStatus,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    init_tracing(std::env::var("MEDIASYNC_DEBUG").is_ok());

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() != 3 {
        eprintln!("用法: upload_demo <object-type> <object-id> <file>");
        std::process::exit(2);
    }
    let object_type = ObjectType::from_str(&args[0])
        .map_err(|_| MediaSyncError::InvalidArgument(format!("未知的对象类型: {}", args[0])))?;
    let object_id = args[1].clone();
    let path = PathBuf::from(&args[2]);

    let api = std::env::var("MEDIASYNC_API").unwrap_or_else(|_| "http://localhost:8060/".to_string());
    let session = match std::env::var("MEDIASYNC_JWT") {
        Ok(jwt) => SessionIdentity::authenticated(jwt),
        Err(_) => SessionIdentity::anonymous(""),
    };

    println!("🚀 MediaSync SDK {} 演示", mediasync_sdk::SDK_VERSION);
    println!("==============================================\n");

    let config = MediaSyncConfig::builder()
        .api_base_url(api.clone())
        .page_origin(api)
        .session(session)
        .build();
    let sdk = MediaSyncSDK::initialize(config).await?;

    let mut events = sdk.subscribe();
    sdk.watch_resource(object_type.as_str(), &object_id)?;

    let file = UploadFile::from_path(&path).await?;
    println!("📤 上传 {} ({} bytes, {})", file.name, file.size, file.mime_type);
    sdk.add_upload(object_type, object_id.clone(), file)?;

    // 等待上传结束
    let finished = tokio::time::timeout(Duration::from_secs(3600), async {
        while let Ok(event) = events.recv().await {
            match event {
                SDKEvent::UploadProgress { progress, .. } => println!("   进度: {}%", progress),
                SDKEvent::UploadStateChanged { new_status, .. } if new_status.is_terminal() => {
                    return Some(new_status);
                }
                SDKEvent::ConnectionStateChanged { new_phase, attempts, .. } => {
                    println!("   📡 连接: {} (重连次数 {})", new_phase, attempts);
                }
                _ => {}
            }
        }
        None
    })
    .await
    .ok()
    .flatten();

    match finished {
        Some(UploadStatus::Succeeded) => println!("✅ 上传成功，等待服务端处理..."),
        Some(status) => {
            let record = sdk.upload(&object_id);
            println!("❌ 上传结束: {}", status);
            if let Some(failure) = record.and_then(|r| r.error) {
                println!("   状态码: {:?}", failure.status);
                println!("   详情: {}", failure.message);
            }
        }
        None => println!("⏱️ 等待超时"),
    }

    sdk.shutdown().await?;
    println!("✅ 已关闭");
    Ok(())
}
