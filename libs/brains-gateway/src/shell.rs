use std::borrow::Cow;

use crate::error::Result;
use crate::executor::RemoteExecutor;

pub fn quote(s: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(s)).into_owned()
}

/// Shell access to one Docker container on a gateway.
pub struct ContainerShell {
    executor: Box<dyn RemoteExecutor>,
    container: String,
}

impl ContainerShell {
    pub fn new(executor: Box<dyn RemoteExecutor>, container: impl Into<String>) -> Self {
        Self {
            executor,
            container: container.into(),
        }
    }

    pub fn host(&self) -> &str {
        self.executor.host()
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Runs `args` inside the container.
    pub async fn exec(&self, args: &str) -> Result<String> {
        self.executor
            .run(&format!("docker exec -i {} {}", quote(&self.container), args))
            .await
    }

    /// Runs `args` inside the container with `input` on stdin.
    pub async fn exec_with_input(&self, input: &str, args: &str) -> Result<String> {
        self.executor
            .run(&format!(
                "printf '%s\\n' {} | docker exec -i {} {}",
                quote(input),
                quote(&self.container),
                args
            ))
            .await
    }

    pub async fn read_file(&self, path: &str) -> Result<String> {
        self.exec(&format!("cat {}", quote(path))).await
    }

    /// Replaces the file with `content` plus a trailing newline.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.exec_with_input(content, &format!("tee {} > /dev/null", quote(path)))
            .await
            .map(|_| ())
    }

    pub async fn restart(&self) -> Result<()> {
        self.executor
            .run(&format!("docker restart {}", quote(&self.container)))
            .await
            .map(|_| ())
    }

    pub async fn close(self) {
        self.executor.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeGateway;

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(quote("/opt/amnezia/awg/wg0.conf"), "/opt/amnezia/awg/wg0.conf");
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), "'it'\\''s'");
    }

    #[tokio::test]
    async fn writes_and_reads_back_multiline_content() {
        let gateway = FakeGateway::new("gw");
        let shell = ContainerShell::new(Box::new(gateway.clone()), "amnezia-awg");

        let content = "[Interface]\nPrivateKey = a'b$c!\n\n[Peer]";
        shell.write_file("/opt/x.conf", content).await.unwrap();

        assert_eq!(gateway.file("amnezia-awg", "/opt/x.conf").unwrap(), format!("{content}\n"));
        assert_eq!(shell.read_file("/opt/x.conf").await.unwrap(), content);
        assert_eq!(
            gateway.commands().last().unwrap(),
            "docker exec -i amnezia-awg cat /opt/x.conf"
        );
    }
}
