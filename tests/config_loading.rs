use loragate::config::Config;

#[tokio::test]
async fn created_default_config_loads_back() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("config.toml");
    let path = path.to_str().unwrap();
    Config::create_default(path).await.unwrap();
    let cfg = Config::load(path).await.unwrap();
    assert_eq!(cfg.station.id, 1);
    assert_eq!(cfg.radio.baud_rate, 57600);
    assert_eq!(cfg.gateway.max_attempts, 3);
}

#[tokio::test]
async fn load_rejects_invalid_station_id() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("config.toml");
    tokio::fs::write(
        &path,
        r#"
            [station]
            id = 150

            [radio]
            port = ""
            baud_rate = 57600

            [storage]
            data_dir = "./data"

            [logging]
            level = "info"
        "#,
    )
    .await
    .unwrap();
    assert!(Config::load(path.to_str().unwrap()).await.is_err());
}

#[tokio::test]
async fn load_reports_missing_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("nope.toml");
    let err = Config::load(path.to_str().unwrap()).await.unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
