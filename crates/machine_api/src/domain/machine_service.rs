use common::cache::{
    cache_aside, machine_key, CachedLoader, MetadataCache, ALL_MACHINES_KEY, MACHINE_KEY_PREFIX,
};
use common::domain::{
    AuthContext, CreateMachineInput, DomainError, DomainResult, Machine, MachineRepository, Role,
    UpdateMachineInput,
};
use common::garde::validate_struct;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Machine CRUD with role checks, cached reads and post-commit invalidation
pub struct MachineService {
    repository: Arc<dyn MachineRepository>,
    cache: MetadataCache,
    machine_loader: CachedLoader<(i64,), Machine>,
    all_machines_loader: CachedLoader<(), Vec<Machine>>,
}

impl MachineService {
    pub fn new(repository: Arc<dyn MachineRepository>, cache: MetadataCache) -> Self {
        let ttl = cache.default_ttl();

        let machine_loader = cache_aside(cache.clone(), MACHINE_KEY_PREFIX, ttl, {
            let repository = Arc::clone(&repository);
            move |(machine_id,): (i64,)| {
                let repository = Arc::clone(&repository);
                async move { repository.get_machine(machine_id).await }
            }
        });

        let all_machines_loader = cache_aside(cache.clone(), ALL_MACHINES_KEY, ttl, {
            let repository = Arc::clone(&repository);
            move |()| {
                let repository = Arc::clone(&repository);
                async move { repository.list_machines().await.map(Some) }
            }
        });

        Self {
            repository,
            cache,
            machine_loader,
            all_machines_loader,
        }
    }

    /// Resolve a machine through the cache without a role check
    pub async fn find_machine(&self, machine_id: i64) -> DomainResult<Option<Machine>> {
        self.machine_loader.load((machine_id,)).await
    }

    #[instrument(skip(self, auth), fields(user = %auth.username))]
    pub async fn get_machine(&self, auth: &AuthContext, machine_id: i64) -> DomainResult<Machine> {
        auth.require_role(Role::Operator)?;

        match self.find_machine(machine_id).await? {
            Some(machine) => Ok(machine),
            None => {
                debug!(machine_id, "machine not found");
                Err(DomainError::MachineNotFound(machine_id))
            }
        }
    }

    #[instrument(skip(self, auth), fields(user = %auth.username))]
    pub async fn get_all_machines(&self, auth: &AuthContext) -> DomainResult<Vec<Machine>> {
        auth.require_role(Role::Operator)?;

        let machines = self.all_machines_loader.load(()).await?;
        Ok(machines.unwrap_or_default())
    }

    #[instrument(skip(self, auth, input), fields(user = %auth.username, name = %input.name))]
    pub async fn create_machine(
        &self,
        auth: &AuthContext,
        input: CreateMachineInput,
    ) -> DomainResult<Machine> {
        auth.require_role(Role::Supervisor)?;
        validate_struct(&input)?;

        let machine = self.repository.create_machine(input).await?;
        self.cache.invalidate_machines().await;

        info!(machine_id = machine.id, "machine created");
        Ok(machine)
    }

    #[instrument(
        skip(self, auth, input),
        fields(user = %auth.username, machine_id = input.machine_id)
    )]
    pub async fn update_machine(
        &self,
        auth: &AuthContext,
        input: UpdateMachineInput,
    ) -> DomainResult<Machine> {
        auth.require_role(Role::Supervisor)?;
        validate_struct(&input)?;
        if !input.has_changes() {
            return Err(DomainError::ValidationError(
                "update must change at least one field".to_string(),
            ));
        }

        let machine_id = input.machine_id;
        let machine = self
            .repository
            .update_machine(input)
            .await?
            .ok_or(DomainError::MachineNotFound(machine_id))?;
        self.cache.invalidate_machines().await;

        info!("machine updated");
        Ok(machine)
    }

    #[instrument(skip(self, auth), fields(user = %auth.username))]
    pub async fn delete_machine(&self, auth: &AuthContext, machine_id: i64) -> DomainResult<()> {
        auth.require_role(Role::Supervisor)?;

        if !self.repository.delete_machine(machine_id).await? {
            return Err(DomainError::MachineNotFound(machine_id));
        }
        self.cache.invalidate_machines().await;

        info!("machine deleted");
        Ok(())
    }

    /// Load every machine from the store into the cache. Returns how many
    /// machines were loaded.
    pub async fn warm_cache(&self) -> DomainResult<usize> {
        let machines = self.repository.list_machines().await?;
        let ttl = Some(self.cache.default_ttl());

        self.cache.set(ALL_MACHINES_KEY, &machines, ttl).await;
        for machine in &machines {
            self.cache.set(&machine_key(machine.id), machine, ttl).await;
        }

        debug!(count = machines.len(), "machine cache warmed");
        Ok(machines.len())
    }
}
