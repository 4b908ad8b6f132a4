/// 任务控制测试
/// 覆盖暂停级联、停止、删除、优先级准入顺序与缓冲区协议
use riptide_download_manager::{
    DownloadEngine, EngineConfig, ErrorCode, StateCode, TaskDescriptor, TaskId, TaskInfo,
};
use std::time::Duration;
use tempfile::TempDir;

mod support;
use support::{test_payload, wait_for_state, TestServer};

fn engine_for(server: &TestServer) -> DownloadEngine {
    DownloadEngine::with_config(EngineConfig {
        endpoint: server.endpoint().to_string(),
        ..EngineConfig::default()
    })
}

/// 轮询读取父任务的分片子任务ID
async fn chunk_ids_of(engine: &DownloadEngine, task_id: TaskId) -> Vec<TaskId> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if let Ok(TaskInfo::Ids(ids)) = engine.task_info(task_id, "chunk_task_ids") {
            if !ids.is_empty() {
                return ids;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("chunk tasks were not planned in time");
}

#[tokio::test]
async fn test_pause_cascades_to_running_children() {
    let server = TestServer::start().await;
    server.serve("slow.bin", test_payload(1_048_576));

    let temp_dir = TempDir::new().unwrap();
    let engine = engine_for(&server);
    // 压低限速，让分片在测试窗口内保持运行状态
    engine.set_download_speed_limit(50).unwrap();

    let task_id = engine
        .create_server_task(TaskDescriptor::new("slow.bin", temp_dir.path(), ""))
        .unwrap();
    engine.execute_task(task_id).unwrap();

    let chunk_ids = chunk_ids_of(&engine, task_id).await;
    assert_eq!(chunk_ids.len(), 2);
    for chunk_id in &chunk_ids {
        assert!(
            wait_for_state(&engine, *chunk_id, StateCode::Started, Duration::from_secs(5)).await,
            "chunk task should enter Started while streaming"
        );
    }

    engine.pause_task(task_id).unwrap();

    assert_eq!(engine.task_state(task_id).unwrap().state_code, StateCode::Paused);
    for chunk_id in &chunk_ids {
        assert_eq!(engine.task_state(*chunk_id).unwrap().state_code, StateCode::Paused);
    }

    // 重复暂停：已不在运行态
    assert_eq!(engine.pause_task(task_id).unwrap_err(), ErrorCode::TaskNotRunning);

    // 停止：任何非 Stopped 状态都可停止，重复停止报错
    engine.stop_task(task_id).unwrap();
    assert_eq!(engine.task_state(task_id).unwrap().state_code, StateCode::Stopped);
    assert_eq!(engine.stop_task(task_id).unwrap_err(), ErrorCode::TaskAlreadyStopped);
}

#[tokio::test]
async fn test_pause_requires_running_task() {
    let server = TestServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_for(&server);

    let task_id = engine
        .create_server_task(TaskDescriptor::new("idle.bin", temp_dir.path(), ""))
        .unwrap();
    assert_eq!(engine.pause_task(task_id).unwrap_err(), ErrorCode::TaskNotRunning);
    assert_eq!(engine.pause_task(9999).unwrap_err(), ErrorCode::TaskNotExist);
}

#[tokio::test]
async fn test_execute_rejected_while_running_or_paused() {
    let server = TestServer::start().await;
    server.serve("busy.bin", test_payload(1_048_576));

    let temp_dir = TempDir::new().unwrap();
    let engine = engine_for(&server);
    engine.set_download_speed_limit(50).unwrap();

    let task_id = engine
        .create_server_task(TaskDescriptor::new("busy.bin", temp_dir.path(), ""))
        .unwrap();
    engine.execute_task(task_id).unwrap();
    assert_eq!(engine.execute_task(task_id).unwrap_err(), ErrorCode::TaskAlreadyRunning);

    let chunk_ids = chunk_ids_of(&engine, task_id).await;
    for chunk_id in &chunk_ids {
        wait_for_state(&engine, *chunk_id, StateCode::Started, Duration::from_secs(5)).await;
    }
    engine.pause_task(task_id).unwrap();
    assert_eq!(engine.execute_task(task_id).unwrap_err(), ErrorCode::TaskAlreadyRunning);
}

#[tokio::test]
async fn test_priority_orders_admission_with_single_slot() {
    let server = TestServer::start().await;
    server.serve("p5.bin", test_payload(100_000));
    server.serve("p1.bin", test_payload(100_000));
    server.serve("p3.bin", test_payload(100_000));

    let temp_dir = TempDir::new().unwrap();
    let engine = engine_for(&server);
    engine.set_concurrent_task_count(1).unwrap();

    let task_p5 = engine
        .create_server_task(TaskDescriptor::new("p5.bin", temp_dir.path(), ""))
        .unwrap();
    let task_p1 = engine
        .create_server_task(TaskDescriptor::new("p1.bin", temp_dir.path(), ""))
        .unwrap();
    let task_p3 = engine
        .create_server_task(TaskDescriptor::new("p3.bin", temp_dir.path(), ""))
        .unwrap();
    engine.set_task_priority(task_p5, 5).unwrap();
    engine.set_task_priority(task_p1, 1).unwrap();
    engine.set_task_priority(task_p3, 3).unwrap();

    // 每轮只有一个并发额度：按优先级 1 → 3 → 5 依次准入
    for expected in [task_p1, task_p3, task_p5] {
        engine.schedule_and_start_tasks().unwrap();
        assert!(
            wait_for_state(&engine, expected, StateCode::Succeeded, Duration::from_secs(10)).await,
            "expected task {expected} to be admitted and finish"
        );
        // 等协调器退出、让出并发额度
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let probes: Vec<String> = server
        .requests()
        .iter()
        .filter(|r| r.method == "HEAD")
        .map(|r| r.filename.clone())
        .collect();
    assert_eq!(probes, vec!["p1.bin", "p3.bin", "p5.bin"]);
}

#[tokio::test]
async fn test_delete_task_removes_files_when_asked() {
    let server = TestServer::start().await;
    let body = test_payload(300_000);
    server.serve("todelete.bin", body);

    let temp_dir = TempDir::new().unwrap();
    let engine = engine_for(&server);

    let task_id = engine
        .create_server_task(TaskDescriptor::new("todelete.bin", temp_dir.path(), ""))
        .unwrap();
    engine.execute_task(task_id).unwrap();
    assert!(wait_for_state(&engine, task_id, StateCode::Succeeded, Duration::from_secs(10)).await);
    assert!(temp_dir.path().join("todelete.bin").exists());

    engine.delete_task(task_id, true).unwrap();
    assert!(!temp_dir.path().join("todelete.bin").exists());
    assert_eq!(engine.task_state(task_id).unwrap_err(), ErrorCode::TaskNotExist);
    assert_eq!(engine.delete_task(task_id, false).unwrap_err(), ErrorCode::TaskNotExist);
}

#[tokio::test]
async fn test_unfinished_buffer_protocol_roundtrip() {
    let server = TestServer::start().await;
    let temp_dir = TempDir::new().unwrap();
    let engine = engine_for(&server);

    let ids: Vec<TaskId> = (0..3)
        .map(|i| {
            engine
                .create_server_task(TaskDescriptor::new(format!("f{i}.bin"), temp_dir.path(), ""))
                .unwrap()
        })
        .collect();

    // 第一次调用拿所需数量
    let mut probe_len = 0u32;
    engine.unfinished_tasks(&mut [], &mut probe_len).unwrap();
    assert_eq!(probe_len, 3);

    // 第二次调用按返回的数量取数据
    let mut out = vec![0u64; probe_len as usize];
    let mut len = probe_len;
    engine.unfinished_tasks(&mut out, &mut len).unwrap();
    assert_eq!(len, 3);
    assert_eq!(out, ids);

    let mut finished_len = 8u32;
    let mut finished = [0u64; 8];
    engine.finished_tasks(&mut finished, &mut finished_len).unwrap();
    assert_eq!(finished_len, 0);
}

#[tokio::test]
async fn test_batch_create_enqueues_in_declaration_order() {
    let server = TestServer::start().await;
    server.serve("batch_a.bin", test_payload(50_000));
    server.serve("batch_b.bin", test_payload(50_000));

    let temp_dir = TempDir::new().unwrap();
    let engine = engine_for(&server);

    let ids = engine
        .create_batch_task(vec![
            TaskDescriptor::new("batch_a.bin", temp_dir.path(), ""),
            TaskDescriptor::new("batch_b.bin", temp_dir.path(), ""),
        ])
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert!(ids[0] < ids[1]);

    engine.schedule_and_start_tasks().unwrap();
    for task_id in &ids {
        assert!(
            wait_for_state(&engine, *task_id, StateCode::Succeeded, Duration::from_secs(10)).await
        );
    }
    assert!(temp_dir.path().join("batch_a.bin").exists());
    assert!(temp_dir.path().join("batch_b.bin").exists());
}

#[tokio::test]
async fn test_task_progress_reaches_hundred() {
    let server = TestServer::start().await;
    server.serve("progress.bin", test_payload(200_000));

    let temp_dir = TempDir::new().unwrap();
    let engine = engine_for(&server);

    let task_id = engine
        .create_server_task(TaskDescriptor::new("progress.bin", temp_dir.path(), ""))
        .unwrap();
    assert!((engine.task_progress(task_id) - 0.0).abs() < f64::EPSILON);

    engine.execute_task(task_id).unwrap();
    assert!(wait_for_state(&engine, task_id, StateCode::Succeeded, Duration::from_secs(10)).await);
    assert!((engine.task_progress(task_id) - 100.0).abs() < f64::EPSILON);
}
