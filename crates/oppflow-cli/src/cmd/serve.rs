use std::path::Path;

/// `oppflow serve --port N`: run the HTTP API and periodic sweep until Ctrl-C.
pub fn run(root: &Path, port: u16) -> anyhow::Result<()> {
    // Fail fast with a readable error before binding anything.
    crate::cmd::open_engine(root)?;

    let rt = tokio::runtime::Runtime::new()?;
    let root_buf = root.to_path_buf();
    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        let actual_port = listener.local_addr()?.port();
        println!(
            "oppflow API for {} → http://localhost:{actual_port}/api  (PID {})",
            root_buf.display(),
            std::process::id()
        );

        tokio::select! {
            res = oppflow_server::serve_on(root_buf, listener) => res,
            _ = tokio::signal::ctrl_c() => Ok(()),
        }
    })
}
