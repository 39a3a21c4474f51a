//! TodoList：有序任务列表 + 依赖 DAG
//!
//! 插入顺序即默认执行优先级；依赖边必须指向已存在的任务，
//! add_dependency 在插入边前做可达性检查，成环直接拒绝。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::session::task::{Task, TaskError, TaskId, TaskStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TodoList {
    tasks: Vec<Task>,
    /// 自动分配 ID 的序号（t1, t2, ...），删除 / 恢复后不回退
    next_seq: u64,
}

impl TodoList {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加新任务并分配 ID；依赖必须已存在
    pub fn add(
        &mut self,
        description: impl Into<String>,
        depends_on: Vec<TaskId>,
    ) -> Result<TaskId, TaskError> {
        let id = loop {
            self.next_seq += 1;
            let candidate = format!("t{}", self.next_seq);
            if self.get(&candidate).is_none() {
                break candidate;
            }
        };
        self.insert(Task::new(id.clone(), description).with_dependencies(depends_on))?;
        Ok(id)
    }

    /// 插入调用方构造的任务（ID 自定）
    pub fn insert(&mut self, task: Task) -> Result<(), TaskError> {
        if self.get(task.id()).is_some() {
            return Err(TaskError::DuplicateId(task.id().to_string()));
        }
        for dep in task.depends_on() {
            if dep == task.id() {
                return Err(TaskError::DependencyCycle {
                    task: task.id().to_string(),
                    dependency: dep.clone(),
                });
            }
            if self.get(dep).is_none() {
                return Err(TaskError::UnknownDependency {
                    task: task.id().to_string(),
                    dependency: dep.clone(),
                });
            }
        }
        self.tasks.push(task);
        Ok(())
    }

    /// 增加依赖边 task -> dependency；若 dependency 已（传递地）依赖 task 则成环，拒绝
    pub fn add_dependency(&mut self, task: &str, dependency: &str) -> Result<(), TaskError> {
        if self.get(task).is_none() {
            return Err(TaskError::UnknownTask(task.to_string()));
        }
        if self.get(dependency).is_none() {
            return Err(TaskError::UnknownDependency {
                task: task.to_string(),
                dependency: dependency.to_string(),
            });
        }
        if task == dependency || self.reaches(dependency, task) {
            return Err(TaskError::DependencyCycle {
                task: task.to_string(),
                dependency: dependency.to_string(),
            });
        }
        if let Some(t) = self.get_mut(task) {
            t.push_dependency(dependency.to_string());
        }
        Ok(())
    }

    /// from 沿 depends_on 是否能走到 target
    fn reaches(&self, from: &str, target: &str) -> bool {
        let mut stack = vec![from.to_string()];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(t) = self.get(&id) {
                stack.extend(t.depends_on().iter().cloned());
            }
        }
        false
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id() == id)
    }

    fn try_get_mut(&mut self, id: &str) -> Result<&mut Task, TaskError> {
        self.get_mut(id)
            .ok_or_else(|| TaskError::UnknownTask(id.to_string()))
    }

    /// 第一个未完成的依赖
    fn blocking_dependency(&self, id: &str) -> Option<TaskId> {
        let task = self.get(id)?;
        task.depends_on()
            .iter()
            .find(|dep| {
                self.get(dep)
                    .map(|d| d.status() != TaskStatus::Complete)
                    .unwrap_or(true)
            })
            .cloned()
    }

    /// pending -> in_progress；依赖未全部完成时拒绝
    pub fn start(&mut self, id: &str) -> Result<(), TaskError> {
        if self.get(id).is_none() {
            return Err(TaskError::UnknownTask(id.to_string()));
        }
        if let Some(dependency) = self.blocking_dependency(id) {
            return Err(TaskError::BlockedBy {
                task: id.to_string(),
                dependency,
            });
        }
        self.try_get_mut(id)?.start()
    }

    pub fn complete(&mut self, id: &str, result: impl Into<String>) -> Result<(), TaskError> {
        self.try_get_mut(id)?.complete(result)
    }

    pub fn fail(&mut self, id: &str, error: impl Into<String>) -> Result<(), TaskError> {
        self.try_get_mut(id)?.fail(error)
    }

    /// 按插入顺序第一个依赖已满足的 pending 任务
    pub fn next_ready(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| {
            t.status() == TaskStatus::Pending && self.blocking_dependency(t.id()).is_none()
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status() == status).count()
    }

    pub fn all_complete(&self) -> bool {
        self.tasks.iter().all(|t| t.status() == TaskStatus::Complete)
    }

    /// 最近一次失败任务的错误信息（按完成时间）
    pub fn last_error(&self) -> Option<&str> {
        self.tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Failed)
            .max_by_key(|t| t.completed_at())
            .and_then(|t| t.error())
    }
}
