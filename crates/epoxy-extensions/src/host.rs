use crate::error::ProvisioningError;

const BMC_SUFFIX: &str = "d";

/// A machine hostname of the form `<site>-<machine>.<project>.<domain...>`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostIdentity {
    pub site: String,
    pub machine: String,
    pub project: String,
    pub domain: String,
}

impl HostIdentity {
    pub fn parse(hostname: &str) -> Result<Self, ProvisioningError> {
        let invalid = || ProvisioningError::InvalidHostname(hostname.to_string());

        let labels: Vec<&str> = hostname.split('.').collect();
        if labels.len() < 3 || labels.iter().any(|label| label.is_empty()) {
            return Err(invalid());
        }
        let (site, machine) = labels[0].split_once('-').ok_or_else(invalid)?;
        if !is_name_segment(site) || !is_name_segment(machine) {
            return Err(invalid());
        }
        let project = labels[1];
        if !project
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(invalid());
        }

        Ok(Self {
            site: site.to_string(),
            machine: machine.to_string(),
            project: project.to_string(),
            domain: labels[2..].join("."),
        })
    }

    pub fn hostname(&self) -> String {
        format!(
            "{}-{}.{}.{}",
            self.site, self.machine, self.project, self.domain
        )
    }

    /// Hostname of this machine's baseboard management controller.
    pub fn bmc_hostname(&self) -> String {
        format!(
            "{}-{}{BMC_SUFFIX}.{}.{}",
            self.site, self.machine, self.project, self.domain
        )
    }
}

fn is_name_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}
