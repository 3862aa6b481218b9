use std::{io, net::TcpListener, path::Path};

use testing_framework_config::constants::LOCAL_HOST;

/// Values substituted into `{{placeholder}}`s of node args and env.
pub struct TemplateVars<'a> {
    pub name: &'a str,
    pub index: usize,
    pub para_id: Option<u32>,
    pub rpc_port: u16,
    pub prometheus_port: u16,
    pub base_path: &'a Path,
}

#[must_use]
pub fn render_template(template: &str, vars: &TemplateVars<'_>) -> String {
    if !template.contains("{{") {
        return template.to_owned();
    }

    let para_id = vars.para_id.map(|id| id.to_string()).unwrap_or_default();
    template
        .replace("{{name}}", vars.name)
        .replace("{{index}}", &vars.index.to_string())
        .replace("{{para_id}}", &para_id)
        .replace("{{rpc_port}}", &vars.rpc_port.to_string())
        .replace("{{prometheus_port}}", &vars.prometheus_port.to_string())
        .replace("{{base_path}}", &vars.base_path.display().to_string())
}

/// Reserve `count` distinct free TCP ports on the loopback interface.
///
/// All listeners are held until every port is known so the OS cannot hand
/// out the same port twice.
pub fn allocate_local_ports(count: usize) -> io::Result<Vec<u16>> {
    let listeners = (0..count)
        .map(|_| TcpListener::bind((LOCAL_HOST, 0)))
        .collect::<io::Result<Vec<_>>>()?;

    listeners
        .iter()
        .map(|listener| listener.local_addr().map(|addr| addr.port()))
        .collect()
}
