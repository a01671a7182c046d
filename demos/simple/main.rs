use local_decisioning::delivery::{
    Context, DeliveryRequest, ExecuteRequest, MboxRequest, PageLoadRequest, PrefetchRequest,
    VisitorId,
};

pub fn main() -> local_decisioning::Result<()> {
    // Configure env_logger to see local decisioning logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("local_decisioning"))
        .init();

    let client_code = std::env::var("TARGET_CLIENT_CODE")
        .expect("TARGET_CLIENT_CODE env variable should contain the client code");
    let client = local_decisioning::ClientConfig::from_client_code(client_code)
        .local_environment("production")
        .exception_handler(|err: &local_decisioning::Error| {
            println!("Recovered from error: {:?}", err);
        })
        .to_client();

    // Start a loader thread to download the rule set.
    client.start_rule_loader()?;

    // Block waiting for rules. Until this call returns, every request is answered with status 500.
    if let Err(err) = client.wait_for_rules() {
        println!("error loading rules: {:?}", err);
    }

    let request = DeliveryRequest {
        id: Some(VisitorId {
            tnt_id: Some("338e3c1e51f7416a8e1ccba4f81acea0.28_0".to_owned()),
            ..Default::default()
        }),
        context: Some(Context {
            channel: Some("web".to_owned()),
            ..Default::default()
        }),
        prefetch: Some(PrefetchRequest {
            page_load: Some(PageLoadRequest::default()),
            ..Default::default()
        }),
        execute: Some(ExecuteRequest {
            mboxes: vec![MboxRequest::new("hero-banner", 1)],
            page_load: None,
        }),
        ..Default::default()
    };

    let evaluation = client.evaluate_local_execution(&request);
    if !evaluation.eligible {
        println!("Not fully local: {}", evaluation.reason.unwrap_or_default());
    }

    let response = client.get_local_offers(&request);
    println!("Status: {} {}", response.status, response.message);
    println!(
        "Response: {}",
        serde_json::to_string_pretty(&response.response).unwrap_or_default()
    );
    println!("Notifications: {:?}", response.notifications);

    client.stop_rule_loader();
    Ok(())
}
