use super::{Caller, DbConsole};
use crate::auth::Action;
use crate::error::CoreResult;
use crate::models::{DataModel, TableInfo, TableRef};

impl DbConsole {
    /// Tables and views of the connected database.
    pub async fn get_data_models(
        &self,
        caller: &Caller,
        conn_id: &str,
    ) -> CoreResult<Vec<TableInfo>> {
        let (_, record) = self
            .gate
            .authorize(&caller.user_id, conn_id, Action::Introspect)
            .await?;

        let mut handle = self.pool.acquire(&record, &caller.cancel).await?;
        let result = self.inspector.list_tables(&mut handle, &caller.cancel).await;
        handle.release().await;
        result
    }

    /// Columns of one table, in declaration order.
    pub async fn get_single_data_model(
        &self,
        caller: &Caller,
        conn_id: &str,
        table: TableRef,
    ) -> CoreResult<DataModel> {
        let (_, record) = self
            .gate
            .authorize(&caller.user_id, conn_id, Action::Introspect)
            .await?;
        table.validate()?;

        let mut handle = self.pool.acquire(&record, &caller.cancel).await?;
        let result = self
            .inspector
            .describe(&mut handle, &table, &caller.cancel)
            .await;
        handle.release().await;
        result
    }
}
