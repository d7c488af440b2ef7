use super::*;

#[test]
fn test_parse_serve_with_global_config() {
    let cli = Cli::try_parse_from(["switchboard", "serve", "--config", "/tmp/sb.json"]).unwrap();
    assert!(matches!(cli.command, Commands::Serve));
    assert_eq!(cli.config, Some(PathBuf::from("/tmp/sb.json")));
}

#[test]
fn test_parse_dlq_commands() {
    let cli = Cli::try_parse_from(["switchboard", "dlq", "list", "--status", "pending"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Dlq {
            cmd: DlqCommands::List { status: Some(ref s) }
        } if s == "pending"
    ));

    let cli = Cli::try_parse_from(["switchboard", "dlq", "requeue", "42"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Dlq {
            cmd: DlqCommands::Requeue { id: 42 }
        }
    ));

    assert!(Cli::try_parse_from(["switchboard", "dlq", "requeue", "abc"]).is_err());
}

#[test]
fn test_parse_worker_once() {
    let cli = Cli::try_parse_from(["switchboard", "worker", "--once"]).unwrap();
    assert!(matches!(cli.command, Commands::Worker { once: true }));
}

#[test]
fn test_parse_status_filter() {
    assert_eq!(parse_status(None).unwrap(), None);
    assert_eq!(
        parse_status(Some("requeued")).unwrap(),
        Some(DeadLetterStatus::Requeued)
    );
    assert!(parse_status(Some("archived")).is_err());
}

#[test]
fn test_dlq_requeue_against_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.path = Some(dir.path().join("sb.db").to_string_lossy().to_string());
    config.queue.max_attempts = 1;

    let queue = open_queue(&config).unwrap();
    queue
        .enqueue(
            QueueName::Primary,
            &crate::queue::NewTask {
                tenant_id: "acme".into(),
                recipient: "5511999990000".into(),
                body: "Hello".into(),
                kind: crate::payload::MessageKind::Text,
                correlation_id: "c-1".into(),
            },
        )
        .unwrap();
    let task = queue.lease(QueueName::Primary).unwrap().unwrap();
    queue
        .dead_letter(&task, crate::queue::PERMANENT_FAILURE, "boom")
        .unwrap();
    let id = queue.list_dead_letters(None).unwrap()[0].id;

    dlq_requeue(&config, id).unwrap();
    assert!(dlq_requeue(&config, id).is_err());
    assert_eq!(queue.depth(QueueName::Reprocess).unwrap(), 1);
}
