use crate::client::ChatClient;
use crate::error::SyncError;
use chatcore::types::{GroupId, UserId};
use chatcore::{GroupMember, GroupRoster, MembershipChange};
use chrono::Utc;
use log::{debug, info, warn};

/// Member management for groups the local user belongs to.
pub struct Groups<'a> {
    client: &'a ChatClient,
}

impl<'a> Groups<'a> {
    pub(crate) fn new(client: &'a ChatClient) -> Self {
        Self { client }
    }

    /// Fetch the member list. Once loaded, the roster follows membership
    /// events until the group is left.
    pub async fn load_members(&self, group: &GroupId) -> Result<Vec<GroupMember>, SyncError> {
        let members = self
            .client
            .service()
            .fetch_group_members(group, self.client.config().member_page_size)
            .await
            .inspect_err(|e| warn!("Failed to fetch members of {group}: {e}"))?;
        debug!("Loaded {} members of {group}", members.len());
        self.client
            .set_roster(group, GroupRoster::load(members.clone()));
        Ok(members)
    }

    /// Members of a loaded roster, empty when it hasn't been loaded.
    pub fn members(&self, group: &GroupId) -> Vec<GroupMember> {
        self.client
            .roster(group)
            .map(|r| r.members().to_vec())
            .unwrap_or_default()
    }

    pub fn is_admin(&self, group: &GroupId) -> bool {
        self.client
            .roster(group)
            .is_some_and(|r| r.is_admin(self.client.local_user()))
    }

    /// Users from `users` that are not members yet.
    pub fn candidates(&self, group: &GroupId, users: &[UserId]) -> Vec<UserId> {
        match self.client.roster(group) {
            Some(roster) => roster.non_members(users).into_iter().cloned().collect(),
            None => users.to_vec(),
        }
    }

    /// Add users as participants. Nothing is sent for an empty selection.
    pub async fn add_members(
        &self,
        group: &GroupId,
        users: &[UserId],
    ) -> Result<Vec<GroupMember>, SyncError> {
        if users.is_empty() {
            return Ok(Vec::new());
        }
        let added = self
            .client
            .service()
            .add_group_members(group, users)
            .await
            .inspect_err(|e| warn!("Failed to add members to {group}: {e}"))?;

        let now = Utc::now();
        self.client.update_roster(group, |roster| {
            added.iter().fold(false, |changed, member| {
                let change = MembershipChange::Joined {
                    user: member.user.clone(),
                    name: Some(member.name.clone()),
                };
                roster.apply(&change, now) || changed
            })
        });
        info!("Added {} members to {group}", added.len());
        Ok(added)
    }

    /// Remove a member. Only admins may do this, and never to themselves.
    pub async fn kick_member(&self, group: &GroupId, user: &UserId) -> Result<(), SyncError> {
        let local = self.client.local_user();
        if user == local {
            return Err(SyncError::NotPermitted(format!(
                "{local} cannot remove themselves from {group}; leave instead"
            )));
        }
        if let Some(roster) = self.client.roster(group)
            && !roster.can_kick(local, user)
        {
            return Err(SyncError::NotPermitted(format!(
                "{local} cannot remove {user} from {group}"
            )));
        }

        self.client
            .service()
            .kick_group_member(group, user)
            .await
            .inspect_err(|e| warn!("Failed to remove {user} from {group}: {e}"))?;
        let change = MembershipChange::Left { user: user.clone() };
        self.client
            .update_roster(group, |roster| roster.apply(&change, Utc::now()));
        info!("Removed {user} from {group}");
        Ok(())
    }

    /// Leave the group and drop its roster and conversation row.
    pub async fn leave(&self, group: &GroupId) -> Result<(), SyncError> {
        self.client
            .service()
            .leave_group(group)
            .await
            .inspect_err(|e| warn!("Failed to leave {group}: {e}"))?;
        self.client.forget_group(group);
        info!("Left {group}");
        Ok(())
    }
}

impl ChatClient {
    pub fn groups(&self) -> Groups<'_> {
        Groups::new(self)
    }
}
